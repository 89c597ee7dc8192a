//! Router for the search proxy.

use std::path::Path;

use axum::Router;
use axum::routing::{get, post};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handler::{self, ProxyState};

/// Build the proxy router: API routes first, static files for everything else.
pub fn create_router(state: ProxyState, static_dir: &Path) -> Router {
    Router::new()
        .route("/movie", get(handler::movie))
        .route("/book", get(handler::book))
        .route("/subscription", post(handler::subscription))
        .route("/sync", post(handler::sync))
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}
