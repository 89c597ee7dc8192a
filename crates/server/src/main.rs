//! shelf search proxy entry point.
//!
//! Forwards book and movie searches to the upstream API, stores push
//! subscriptions, accepts deferred sync deliveries and serves the static
//! client. Logs go to stderr as JSON.

use anyhow::Result;
use shelf_core::{AppConfig, CacheDb};
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod routes;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let cache = CacheDb::open(&config.db_path).await?;
    let http = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .use_rustls_tls()
        .build()?;

    tracing::info!(upstream = %config.upstream_url, static_dir = %config.static_dir.display(), "starting shelf proxy");

    let state = handler::ProxyState { http, upstream_url: config.upstream_url.clone(), cache };
    let router = routes::create_router(state, &config.static_dir);

    server::Server::new("0.0.0.0", config.port).run(router).await
}
