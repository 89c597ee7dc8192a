//! Background sync registration.
//!
//! Three registration patterns share one state machine,
//! `Idle -> Registering -> Registered | RegistrationFailed`:
//!
//! - plain: register the tag and log the outcome
//! - message-carrying: register with a `bgsync` message for the worker
//! - store-carrying: write the payload to the local store, then register
//!
//! Failures are logged and end in `RegistrationFailed`. Nothing retries
//! automatically from here; a later explicit call starts over.

use std::collections::HashMap;

use serde::Serialize;
use shelf_core::{Error, LocalStore, SyncItem};
use tokio::sync::Mutex;

use crate::worker::{WorkerHandle, WorkerMessage};

/// Tag of the plain deferred task.
pub const SAMPLE_SYNC: &str = "sample_sync";

/// Tag of the message-carrying deferred task.
pub const SAMPLE_SYNC_EVENT: &str = "sample_sync_event";

/// Tag of the store-carrying deferred task.
pub const SAMPLE_SYNC_DB: &str = "sample_sync_db";

/// Registration state of one tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationState {
    #[default]
    Idle,
    Registering,
    Registered,
    RegistrationFailed,
}

/// Registers deferred tasks with the background execution context.
pub struct SyncRegistrar {
    worker: WorkerHandle,
    store: Option<LocalStore>,
    states: Mutex<HashMap<String, RegistrationState>>,
}

impl SyncRegistrar {
    /// `store` is `None` when the local store could not be opened; the
    /// store-carrying pattern then fails with `StoreUnavailable`.
    pub fn new(worker: WorkerHandle, store: Option<LocalStore>) -> Self {
        Self { worker, store, states: Mutex::new(HashMap::new()) }
    }

    /// Current state of `tag`.
    pub async fn state(&self, tag: &str) -> RegistrationState {
        self.states.lock().await.get(tag).copied().unwrap_or_default()
    }

    /// Register `tag` with no attached data.
    pub async fn register(&self, tag: &str) -> RegistrationState {
        self.set(tag, RegistrationState::Registering).await;
        match self.worker.register(tag).await {
            Ok(()) => {
                tracing::info!(tag, "sync registered");
                self.set(tag, RegistrationState::Registered).await
            }
            Err(e) => self.fail(tag, "sync.register_failed", &e).await,
        }
    }

    /// Register `tag` and hand the worker the freshest value by message.
    ///
    /// The message travels with the registration: the worker keeps it only
    /// if it accepts the tag, and before the task can run.
    pub async fn register_with_message(&self, tag: &str, name: &str) -> RegistrationState {
        self.set(tag, RegistrationState::Registering).await;
        let registered = match WorkerMessage::bgsync(name).encode() {
            Ok(message) => self.worker.register_with_message(tag, message).await,
            Err(e) => Err(e),
        };
        match registered {
            Ok(()) => {
                tracing::info!(tag, name, "sync registered with message");
                self.set(tag, RegistrationState::Registered).await
            }
            Err(e) => self.fail(tag, "sync.register_failed", &e).await,
        }
    }

    /// Durably store `payload` under `tag`, then register `tag`.
    ///
    /// A failed store write aborts before registering. A failed registration
    /// leaves the stored item in place for a later attempt.
    pub async fn register_with_store(&self, tag: &str, payload: impl Serialize) -> RegistrationState {
        self.set(tag, RegistrationState::Registering).await;

        let stored = match &self.store {
            Some(store) => match SyncItem::new(tag, payload) {
                Ok(item) => store.put(&item).await,
                Err(e) => Err(e),
            },
            None => Err(Error::StoreUnavailable("local store is not open".into())),
        };
        if let Err(e) = stored {
            return self.fail(tag, "sync.store_write_failed", &e).await;
        }

        self.register(tag).await
    }

    async fn set(&self, tag: &str, state: RegistrationState) -> RegistrationState {
        self.states.lock().await.insert(tag.to_string(), state);
        state
    }

    async fn fail(&self, tag: &str, event: &'static str, err: &Error) -> RegistrationState {
        tracing::warn!(event, tag, code = err.code(), "sync registration failed: {}", err);
        self.set(tag, RegistrationState::RegistrationFailed).await
    }
}
