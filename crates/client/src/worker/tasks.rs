//! Built-in deferred tasks. Each one delivers a JSON payload to the sync
//! delivery endpoint through the shared [`Fetcher`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use shelf_core::{Error, LocalStore};

use super::{Mailbox, SyncTask};
use crate::fetch::{FetchOutcome, Fetcher};

async fn deliver(fetcher: &dyn Fetcher, url: &str, body: &Value) -> Result<(), Error> {
    match fetcher.post_json(url, body).await? {
        FetchOutcome::NoData { status } => Err(Error::Upstream(format!("delivery to {url} returned {status}"))),
        _ => Ok(()),
    }
}

/// Announces that the tag fired; carries no data.
pub struct PingTask {
    fetcher: Arc<dyn Fetcher>,
    url: String,
}

impl PingTask {
    pub fn new(fetcher: Arc<dyn Fetcher>, url: impl Into<String>) -> Self {
        Self { fetcher, url: url.into() }
    }
}

#[async_trait]
impl SyncTask for PingTask {
    async fn run(&self, tag: &str) -> Result<(), Error> {
        deliver(self.fetcher.as_ref(), &self.url, &json!({ "tag": tag })).await
    }
}

/// Delivers the freshest `bgsync` message posted to the worker.
pub struct MessageDeliveryTask {
    fetcher: Arc<dyn Fetcher>,
    url: String,
    mailbox: Mailbox,
}

impl MessageDeliveryTask {
    pub fn new(fetcher: Arc<dyn Fetcher>, url: impl Into<String>, mailbox: Mailbox) -> Self {
        Self { fetcher, url: url.into(), mailbox }
    }
}

#[async_trait]
impl SyncTask for MessageDeliveryTask {
    async fn run(&self, tag: &str) -> Result<(), Error> {
        let Some(msg) = self.mailbox.lock().await.clone() else {
            return Err(Error::InvalidInput(format!("no message posted for '{tag}' yet")));
        };
        deliver(self.fetcher.as_ref(), &self.url, &json!({ "tag": tag, "name": msg.name })).await?;

        // A newer message posted during delivery stays for the next run.
        let mut mailbox = self.mailbox.lock().await;
        if mailbox.as_ref() == Some(&msg) {
            mailbox.take();
        }
        Ok(())
    }
}

/// Delivers the sync item stored under the tag and deletes it afterwards,
/// unless it was overwritten while being delivered.
pub struct StoreDeliveryTask {
    fetcher: Arc<dyn Fetcher>,
    url: String,
    store: LocalStore,
}

impl StoreDeliveryTask {
    pub fn new(fetcher: Arc<dyn Fetcher>, url: impl Into<String>, store: LocalStore) -> Self {
        Self { fetcher, url: url.into(), store }
    }
}

#[async_trait]
impl SyncTask for StoreDeliveryTask {
    async fn run(&self, tag: &str) -> Result<(), Error> {
        let Some(stored) = self.store.get_by_index(tag).await? else {
            tracing::debug!(tag, "no stored item, nothing to deliver");
            return Ok(());
        };

        deliver(self.fetcher.as_ref(), &self.url, &stored.item.to_record()).await?;
        if !self.store.delete_stored(&stored).await? {
            tracing::debug!(tag, "sync item replaced during delivery, kept");
        }
        Ok(())
    }
}
