//! Application context, built once at startup.
//!
//! Owns the response cache, the local store, the shared fetcher and the
//! background worker, and hands out the orchestrator, registrar and push
//! manager wired against them.

use std::sync::Arc;

use shelf_core::{AppConfig, CacheDb, Error, LocalStore};
use tokio::sync::{mpsc, watch};

use crate::fetch::{CachingFetcher, FetchClient, FetchConfig, Fetcher};
use crate::push::{PushManager, PushPlatform};
use crate::search::{QueryOrchestrator, ResponseCache};
use crate::sync::{SAMPLE_SYNC, SAMPLE_SYNC_DB, SAMPLE_SYNC_EVENT, SyncRegistrar};
use crate::worker::{
    ClientMessage, Connectivity, MessageDeliveryTask, PingTask, StoreDeliveryTask, WorkerBuilder, WorkerHandle,
};

pub struct AppContext {
    pub config: AppConfig,
    pub cache: CacheDb,
    pub store: Option<LocalStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub worker: WorkerHandle,
    connectivity: watch::Sender<Connectivity>,
}

impl AppContext {
    /// Open storage, build the fetcher and spawn the worker.
    ///
    /// A store that fails to open is logged and left out; everything else
    /// still works and store-carrying registrations fail. Items left in the
    /// store by an earlier run are registered again.
    pub async fn init(config: AppConfig) -> Result<(Self, mpsc::UnboundedReceiver<ClientMessage>), Error> {
        let cache = CacheDb::open(&config.db_path).await?;
        let client = FetchClient::new(FetchConfig::from(&config))?;
        Self::with_parts(config, cache, Arc::new(client)).await
    }

    /// Assemble a context around an existing cache and network fetcher.
    pub async fn with_parts(
        config: AppConfig, cache: CacheDb, network: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientMessage>), Error> {
        let store = match LocalStore::open(&config.store_path).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(event = "store.open_failed", code = e.code(), "local store unavailable: {}", e);
                None
            }
        };

        let fetcher: Arc<dyn Fetcher> = Arc::new(CachingFetcher::new(network, cache.clone()));
        let delivery_url = config.url_for(&config.sync.delivery_path);

        let builder = WorkerBuilder::new();
        let mailbox = builder.mailbox();
        let mut builder = builder
            .task(SAMPLE_SYNC, Arc::new(PingTask::new(fetcher.clone(), delivery_url.clone())))
            .task(
                SAMPLE_SYNC_EVENT,
                Arc::new(MessageDeliveryTask::new(fetcher.clone(), delivery_url.clone(), mailbox)),
            );
        if let Some(store) = &store {
            builder = builder.task(
                SAMPLE_SYNC_DB,
                Arc::new(StoreDeliveryTask::new(fetcher.clone(), delivery_url, store.clone())),
            );
            // Stored items outlive the process; so does their registration.
            match store.tags().await {
                Ok(tags) => builder = builder.restore(tags.into_iter().filter(|tag| tag == SAMPLE_SYNC_DB)),
                Err(e) => tracing::warn!(event = "store.scan_failed", code = e.code(), "stored sync items not restored: {}", e),
            }
        }

        let (connectivity, connectivity_rx) = watch::channel(Connectivity::Offline);
        let (worker, messages) = builder.spawn(connectivity_rx);

        Ok((Self { config, cache, store, fetcher, worker, connectivity }, messages))
    }

    pub fn orchestrator(&self) -> QueryOrchestrator {
        let cache: Arc<dyn ResponseCache> = Arc::new(self.cache.clone());
        QueryOrchestrator::from_config(cache, self.fetcher.clone(), &self.config)
    }

    pub fn registrar(&self) -> SyncRegistrar {
        SyncRegistrar::new(self.worker.clone(), self.store.clone())
    }

    pub fn push_manager(&self, platform: Arc<dyn PushPlatform>) -> PushManager {
        PushManager::new(platform, self.fetcher.clone(), &self.config)
    }

    /// Report a connectivity change to the worker.
    pub fn set_connectivity(&self, state: Connectivity) {
        self.connectivity.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchOutcome;
    use crate::search::{QueryOutcome, RenderSource, SearchEvent};
    use crate::sync::RegistrationState;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNetwork {
        posts: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Fetcher for FakeNetwork {
        async fn get(&self, _url: &str) -> Result<FetchOutcome, Error> {
            Ok(FetchOutcome::Json(json!({"books": [{"title": "Plain Architecture", "author": "A. B."}]})))
        }

        async fn post_json(&self, url: &str, body: &Value) -> Result<FetchOutcome, Error> {
            self.posts.lock().unwrap().push((url.to_string(), body.clone()));
            Ok(FetchOutcome::Json(json!({"ok": true})))
        }
    }

    async fn context(dir: &tempfile::TempDir) -> (AppContext, Arc<FakeNetwork>) {
        let config = AppConfig { store_path: dir.path().join("store.sqlite"), ..Default::default() };
        let network = Arc::new(FakeNetwork::default());
        let cache = CacheDb::open_in_memory().await.unwrap();
        let (ctx, _messages) = AppContext::with_parts(config, cache, network.clone()).await.unwrap();
        (ctx, network)
    }

    #[tokio::test]
    async fn test_second_query_renders_from_cache_once() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir).await;
        let orchestrator = ctx.orchestrator();
        let (tx, _rx) = mpsc::unbounded_channel::<SearchEvent>();

        let first = orchestrator.search("plain architecture", &tx).await;
        assert_eq!(first, QueryOutcome::Rendered { last: RenderSource::Network, renders: 1 });

        let second = orchestrator.search("plain architecture", &tx).await;
        assert_eq!(second, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
    }

    #[tokio::test]
    async fn test_store_sync_delivered_on_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, network) = context(&dir).await;
        let registrar = ctx.registrar();

        let state = registrar.register_with_store(SAMPLE_SYNC_DB, json!({"name": "foo"})).await;
        assert_eq!(state, RegistrationState::Registered);
        assert!(network.posts.lock().unwrap().is_empty());

        ctx.set_connectivity(Connectivity::Online);
        while !ctx.worker.pending_tags().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        let posts = network.posts.lock().unwrap();
        assert_eq!(posts[0].0, "http://127.0.0.1:8085/sync");
        assert_eq!(posts[0].1, json!({"tag": "sample_sync_db", "name": "foo"}));
        drop(posts);
        assert!(ctx.store.as_ref().unwrap().get(SAMPLE_SYNC_DB).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_sync_delivered_online() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, network) = context(&dir).await;
        ctx.set_connectivity(Connectivity::Online);

        let state = ctx.registrar().register_with_message(SAMPLE_SYNC_EVENT, "foo").await;
        assert_eq!(state, RegistrationState::Registered);

        while !ctx.worker.pending_tags().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let posts = network.posts.lock().unwrap();
        assert_eq!(posts.last().unwrap().1, json!({"tag": "sample_sync_event", "name": "foo"}));
    }

    #[tokio::test]
    async fn test_each_message_sync_delivers_its_own_value() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, network) = context(&dir).await;
        ctx.set_connectivity(Connectivity::Online);
        let registrar = ctx.registrar();

        for name in ["foo", "bar"] {
            let state = registrar.register_with_message(SAMPLE_SYNC_EVENT, name).await;
            assert_eq!(state, RegistrationState::Registered);
            while !ctx.worker.pending_tags().await.unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        }

        let names: Vec<Value> = network.posts.lock().unwrap().iter().map(|(_, body)| body["name"].clone()).collect();
        assert_eq!(names, vec![json!("foo"), json!("bar")]);
    }

    #[tokio::test]
    async fn test_store_sync_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let (ctx, network) = context(&dir).await;
            let state = ctx.registrar().register_with_store(SAMPLE_SYNC_DB, json!({"name": "foo"})).await;
            assert_eq!(state, RegistrationState::Registered);
            assert!(network.posts.lock().unwrap().is_empty());
        }

        let (ctx, network) = context(&dir).await;
        assert_eq!(ctx.worker.pending_tags().await.unwrap(), vec![SAMPLE_SYNC_DB.to_string()]);

        ctx.set_connectivity(Connectivity::Online);
        while !ctx.worker.pending_tags().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(network.posts.lock().unwrap()[0].1, json!({"tag": "sample_sync_db", "name": "foo"}));
        assert!(ctx.store.as_ref().unwrap().get(SAMPLE_SYNC_DB).await.unwrap().is_none());
    }
}
