//! Client side of shelf.
//!
//! This crate provides the timed network fetcher, the cache-then-network
//! query orchestrator, the background worker with its sync registrar, and the
//! push subscription flow. The CLI drives all of it through [`AppContext`].

pub mod context;
pub mod fetch;
pub mod push;
pub mod search;
pub mod sync;
pub mod worker;

pub use context::AppContext;
pub use fetch::{CachingFetcher, FetchClient, FetchConfig, FetchOutcome, Fetcher, RequestKey, request_key};
pub use push::{ActionDispatcher, ClientAction, HeadlessPlatform, Navigator, PushManager, PushPlatform, PushState};
pub use search::{Book, BookList, QueryOrchestrator, QueryOutcome, RenderSink, RenderSource, ResponseCache, SearchEvent};
pub use sync::{RegistrationState, SyncRegistrar};
pub use worker::{ClientMessage, Connectivity, SyncTask, WorkerBuilder, WorkerHandle, WorkerMessage};
