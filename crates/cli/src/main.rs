//! `shelf` command line client.
//!
//! Runs book searches through the cache-then-network orchestrator, registers
//! background sync tasks, walks the push subscription flow against the
//! headless platform, and inspects the local store and response cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use shelf_client::sync::{SAMPLE_SYNC, SAMPLE_SYNC_DB, SAMPLE_SYNC_EVENT};
use shelf_client::{
    ActionDispatcher, AppContext, ClientMessage, Connectivity, HeadlessPlatform, Navigator, QueryOutcome,
    RegistrationState, RenderSource, SearchEvent,
};
use shelf_core::{AppConfig, CacheDb, LocalStore};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shelf")]
#[command(about = "Offline-tolerant book search client", long_about = None)]
struct Cli {
    /// Treat the network as unavailable for background tasks
    #[arg(long, global = true, env = "SHELF_OFFLINE")]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search books, rendering the cached result first
    Search { query: String },
    /// Register a background sync task
    Sync {
        #[arg(value_enum)]
        pattern: SyncPattern,
        /// Value carried by the `event` and `store` patterns
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Run the push subscription flow
    Subscribe {
        /// Show the invitation notification once registered
        #[arg(long)]
        notify: bool,
        /// Notification action to click (e.g. show-book, contact-me)
        #[arg(long)]
        click: Option<String>,
    },
    /// Inspect the persistent local store
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },
    /// Maintain the HTTP response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SyncPattern {
    /// Plain tag, no data
    Basic,
    /// Tag plus a posted message
    Event,
    /// Tag plus a stored item
    Store,
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Print the item stored under a tag
    Get { tag: String },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Delete cached responses by age and/or count
    Purge {
        #[arg(long)]
        older_than_days: Option<i64>,
        #[arg(long)]
        max_entries: Option<usize>,
    },
}

/// Prints navigation side effects instead of performing them.
struct Terminal;

impl Navigator for Terminal {
    fn navigate(&self, url: &str) {
        println!("navigate: {url}");
    }

    fn show_panel(&self) {
        println!("panel shown");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Search { query } => search(config, cli.offline, &query).await,
        Commands::Sync { pattern, name } => sync(config, cli.offline, pattern, &name).await,
        Commands::Subscribe { notify, click } => subscribe(config, notify, click).await,
        Commands::Store { command: StoreCommand::Get { tag } } => {
            let store = LocalStore::open(&config.store_path).await?;
            match store.get(&tag).await? {
                Some(item) => println!("{}", serde_json::to_string_pretty(&item.to_record())?),
                None => println!("no item stored under '{tag}'"),
            }
            Ok(())
        }
        Commands::Cache { command: CacheCommand::Purge { older_than_days, max_entries } } => {
            if older_than_days.is_none() && max_entries.is_none() {
                bail!("specify --older-than-days and/or --max-entries");
            }
            let cache = CacheDb::open(&config.db_path).await?;
            let mut deleted = 0;
            if let Some(days) = older_than_days {
                deleted += cache.purge_responses_older_than(days).await?;
            }
            if let Some(max) = max_entries {
                deleted += cache.purge_lru_responses(max).await?;
            }
            println!("deleted {deleted} cached responses");
            Ok(())
        }
    }
}

async fn context(config: AppConfig, offline: bool) -> Result<(AppContext, mpsc::UnboundedReceiver<ClientMessage>)> {
    let (ctx, messages) = AppContext::init(config).await.context("failed to start client")?;
    if !offline {
        ctx.set_connectivity(Connectivity::Online);
    }
    Ok((ctx, messages))
}

async fn search(config: AppConfig, offline: bool, query: &str) -> Result<()> {
    let (ctx, _messages) = context(config, offline).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<SearchEvent>();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SearchEvent::PromptForInput => println!("please enter a query"),
                SearchEvent::Loading(true) => eprintln!("loading..."),
                SearchEvent::Loading(false) => {}
                SearchEvent::Render { source, result } => {
                    let label = match source {
                        RenderSource::Cache => "cache",
                        RenderSource::Network => "network",
                    };
                    println!("[{label}] {} result(s)", result.len());
                    for book in &result.books {
                        let price = book.price.as_deref().unwrap_or("-");
                        let publisher = book.publisher.as_deref().unwrap_or("-");
                        println!("  {} / {} / {} / {}", book.title, book.authors(), publisher, price);
                    }
                }
                SearchEvent::Failed => println!("no results"),
            }
        }
    });

    let outcome = ctx.orchestrator().search(query, &tx).await;
    drop(tx);
    printer.await?;

    tracing::debug!(?outcome, "search finished");
    if outcome == QueryOutcome::Failed {
        bail!("search for '{query}' produced no results");
    }
    Ok(())
}

async fn sync(config: AppConfig, offline: bool, pattern: SyncPattern, name: &str) -> Result<()> {
    let timeout = config.timeout();
    let (ctx, _messages) = context(config, offline).await?;
    let registrar = ctx.registrar();

    let (tag, state) = match pattern {
        SyncPattern::Basic => (SAMPLE_SYNC, registrar.register(SAMPLE_SYNC).await),
        SyncPattern::Event => (SAMPLE_SYNC_EVENT, registrar.register_with_message(SAMPLE_SYNC_EVENT, name).await),
        SyncPattern::Store => (
            SAMPLE_SYNC_DB,
            registrar
                .register_with_store(SAMPLE_SYNC_DB, serde_json::json!({ "name": name }))
                .await,
        ),
    };
    println!("{tag}: {state:?}");

    if state != RegistrationState::Registered || offline {
        return Ok(());
    }

    let flushed = tokio::time::timeout(timeout, async {
        while !ctx.worker.pending_tags().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    match flushed {
        Ok(()) => println!("{tag}: delivered"),
        Err(_) => println!("{tag}: still pending"),
    }
    Ok(())
}

async fn subscribe(config: AppConfig, notify: bool, click: Option<String>) -> Result<()> {
    let links = config.links.clone();
    let mut platform = HeadlessPlatform::new(&config.push);
    let (ctx, mut messages) = context(config, false).await?;

    platform = platform.with_worker(ctx.worker.clone());
    if let Some(action) = click {
        platform = platform.with_click(action);
    }

    let mut manager = ctx.push_manager(Arc::new(platform));
    let state = manager.run().await;
    println!("push: {state:?}");
    if let Some(id) = manager.client_id() {
        println!("client id: {id}");
    }

    if notify {
        manager.show_invitation().await?;
        let dispatcher = ActionDispatcher::new(Terminal, links);
        if let Ok(Some(ClientMessage(message))) = tokio::time::timeout(Duration::from_secs(1), messages.recv()).await {
            dispatcher.dispatch(&message);
        }
    }
    Ok(())
}
