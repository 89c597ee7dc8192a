//! Cache-then-network query orchestration.
//!
//! For one query invocation the orchestrator starts the network fetch, looks
//! the request key up in the response cache while the fetch is in flight,
//! renders a cache hit immediately as the baseline, and renders the network
//! result afterwards only when it differs from that baseline.
//!
//! ### Guarantees
//! - A cache render never follows a network render within one invocation.
//! - At most one network-driven render per invocation.
//! - Equal cache and network results produce exactly one render.
//! - A network failure after a cache render leaves the cache result standing.

pub mod model;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use shelf_core::{AppConfig, CacheDb, Error};
use tokio::sync::mpsc::UnboundedSender;

use crate::fetch::{FetchOutcome, Fetcher, RequestKey, UrlError, request_key};

pub use model::{Book, BookList};

/// Where a rendered result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    Cache,
    Network,
}

/// Events a query invocation emits for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// The query was empty; ask the user for input.
    PromptForInput,
    /// Show or hide the loading indicator.
    Loading(bool),
    /// Render a result list.
    Render { source: RenderSource, result: BookList },
    /// Nothing could be rendered for this query.
    Failed,
}

/// Receives search events.
pub trait RenderSink: Send + Sync {
    fn emit(&self, event: SearchEvent);
}

impl RenderSink for UnboundedSender<SearchEvent> {
    fn emit(&self, event: SearchEvent) {
        if self.send(event).is_err() {
            tracing::debug!("render sink closed, dropping search event");
        }
    }
}

/// Final state of a query invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Empty query; no cache or network access happened.
    PromptedForInput,
    /// At least one render happened; `last` produced the final state.
    Rendered { last: RenderSource, renders: u8 },
    /// A newer query was issued before the network answered; its result was
    /// dropped and nothing had been rendered.
    Superseded,
    /// Neither cache nor network produced a renderable result.
    Failed,
}

/// Read access to previously stored responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// The stored body for `key`, or `None` on a miss.
    async fn lookup(&self, key: &RequestKey) -> Result<Option<Value>, Error>;
}

#[async_trait]
impl ResponseCache for CacheDb {
    async fn lookup(&self, key: &RequestKey) -> Result<Option<Value>, Error> {
        let Some(entry) = self.get_response(key.as_str()).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&entry.body).unwrap_or(Value::String(entry.body))))
    }
}

/// Races the response cache against the network for book queries.
#[derive(Clone)]
pub struct QueryOrchestrator {
    cache: Arc<dyn ResponseCache>,
    fetcher: Arc<dyn Fetcher>,
    base_url: String,
    timeout: Duration,
    discard_stale: bool,
    sequence: Arc<AtomicU64>,
}

impl QueryOrchestrator {
    pub fn new(cache: Arc<dyn ResponseCache>, fetcher: Arc<dyn Fetcher>, base_url: impl Into<String>) -> Self {
        Self {
            cache,
            fetcher,
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
            discard_stale: false,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build from application configuration.
    pub fn from_config(cache: Arc<dyn ResponseCache>, fetcher: Arc<dyn Fetcher>, config: &AppConfig) -> Self {
        Self::new(cache, fetcher, config.base_url.clone())
            .with_timeout(config.timeout())
            .with_discard_stale(config.search.discard_stale)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drop network results of queries that were superseded by a newer one.
    pub fn with_discard_stale(mut self, discard_stale: bool) -> Self {
        self.discard_stale = discard_stale;
        self
    }

    /// The request key a query resolves to.
    pub fn request_key(&self, query: &str) -> Result<RequestKey, UrlError> {
        request_key(&self.base_url, query)
    }

    /// Run one query invocation, emitting events to `sink`.
    pub async fn search(&self, query: &str, sink: &dyn RenderSink) -> QueryOutcome {
        let key = match self.request_key(query) {
            Ok(key) => key,
            Err(UrlError::EmptyQuery) => {
                sink.emit(SearchEvent::PromptForInput);
                return QueryOutcome::PromptedForInput;
            }
            Err(e) => {
                tracing::error!(event = "search.invalid_base_url", base_url = %self.base_url, "{}", e);
                sink.emit(SearchEvent::Failed);
                return QueryOutcome::Failed;
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        sink.emit(SearchEvent::Loading(true));

        let network = {
            let fetcher = Arc::clone(&self.fetcher);
            let url = key.to_string();
            let timeout = self.timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, fetcher.get(&url)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Transport(format!("timed out after {}ms", timeout.as_millis()))),
                }
            })
        };

        let baseline = self.baseline(&key).await;
        let mut renders = 0u8;

        if let Some((_, list)) = &baseline {
            sink.emit(SearchEvent::Loading(false));
            sink.emit(SearchEvent::Render { source: RenderSource::Cache, result: list.clone() });
            renders += 1;
        }

        let result = match network.await {
            Ok(result) => result,
            Err(e) => Err(Error::Transport(format!("fetch task aborted: {e}"))),
        };

        if self.discard_stale && self.sequence.load(Ordering::SeqCst) != sequence {
            tracing::debug!(key = %key, "dropping network result of superseded query");
            return match baseline {
                Some(_) => QueryOutcome::Rendered { last: RenderSource::Cache, renders },
                None => {
                    sink.emit(SearchEvent::Loading(false));
                    QueryOutcome::Superseded
                }
            };
        }

        let fresh = match result {
            Ok(FetchOutcome::Json(value)) => {
                if baseline.as_ref().is_some_and(|(cached, _)| *cached == value) {
                    tracing::debug!(key = %key, "network result equals cached result, render suppressed");
                    return QueryOutcome::Rendered { last: RenderSource::Cache, renders };
                }
                let list = BookList::from_value(&value);
                if list.is_none() {
                    tracing::warn!(event = "search.unrenderable_response", key = %key, "response carries no book list");
                }
                list
            }
            Ok(FetchOutcome::Text(_)) => {
                tracing::warn!(event = "search.unrenderable_response", key = %key, "response is not JSON");
                None
            }
            Ok(FetchOutcome::NoData { status }) => {
                tracing::warn!(event = "search.no_data", key = %key, status, "network returned no data");
                None
            }
            Err(e) => {
                tracing::warn!(event = "search.network_failed", key = %key, cached = baseline.is_some(), "{}", e);
                None
            }
        };

        match (fresh, baseline) {
            (Some(list), _) => {
                sink.emit(SearchEvent::Loading(false));
                sink.emit(SearchEvent::Render { source: RenderSource::Network, result: list });
                QueryOutcome::Rendered { last: RenderSource::Network, renders: renders + 1 }
            }
            (None, Some(_)) => QueryOutcome::Rendered { last: RenderSource::Cache, renders },
            (None, None) => {
                sink.emit(SearchEvent::Loading(false));
                sink.emit(SearchEvent::Failed);
                QueryOutcome::Failed
            }
        }
    }

    /// Cache hit for `key` that carries a renderable list.
    async fn baseline(&self, key: &RequestKey) -> Option<(Value, BookList)> {
        match self.cache.lookup(key).await {
            Ok(Some(value)) => match BookList::from_value(&value) {
                Some(list) => Some((value, list)),
                None => {
                    tracing::warn!(event = "search.unrenderable_cache_entry", key = %key, "ignoring cached entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(event = "search.cache_read_failed", key = %key, "{}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    const BASE: &str = "http://127.0.0.1:8085";

    #[derive(Default)]
    struct MapCache {
        entries: Mutex<HashMap<String, Value>>,
        lookups: AtomicUsize,
    }

    impl MapCache {
        fn with(query: &str, value: Value) -> Self {
            let cache = Self::default();
            let key = request_key(BASE, query).unwrap();
            cache.entries.lock().unwrap().insert(key.to_string(), value);
            cache
        }
    }

    #[async_trait]
    impl ResponseCache for MapCache {
        async fn lookup(&self, key: &RequestKey) -> Result<Option<Value>, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
        }
    }

    enum Reply {
        Outcome(FetchOutcome),
        Fail,
        Hang,
    }

    struct ScriptedFetcher {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self { reply, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn get(&self, _url: &str) -> Result<FetchOutcome, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Outcome(outcome) => Ok(outcome.clone()),
                Reply::Fail => Err(Error::Transport("connection reset".into())),
                Reply::Hang => std::future::pending().await,
            }
        }

        async fn post_json(&self, _url: &str, _body: &Value) -> Result<FetchOutcome, Error> {
            unreachable!("orchestrator never posts")
        }
    }

    fn scenario_payload() -> Value {
        json!({"books": [{"title": "Plain Architecture", "author": "A. B.", "publisher": "X", "price": "$10"}]})
    }

    async fn run(cache: Arc<dyn ResponseCache>, fetcher: Arc<dyn Fetcher>, query: &str) -> (QueryOutcome, Vec<SearchEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SearchEvent>();
        let orchestrator = QueryOrchestrator::new(cache, fetcher, BASE);
        let outcome = orchestrator.search(query, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn renders(events: &[SearchEvent]) -> Vec<(RenderSource, BookList)> {
        events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::Render { source, result } => Some((*source, result.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_query_prompts_without_io() {
        let cache = Arc::new(MapCache::default());
        let fetcher = ScriptedFetcher::new(Reply::Fail);

        let (outcome, events) = run(cache.clone(), fetcher.clone(), "").await;

        assert_eq!(outcome, QueryOutcome::PromptedForInput);
        assert_eq!(events, vec![SearchEvent::PromptForInput]);
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cold_cache_renders_network_once() {
        let cache = Arc::new(MapCache::default());
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Json(scenario_payload())));

        let (outcome, events) = run(cache, fetcher, "plain architecture").await;

        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Network, renders: 1 });
        let rendered = renders(&events);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].0, RenderSource::Network);
        assert_eq!(rendered[0].1.books[0].title, "Plain Architecture");
    }

    #[tokio::test]
    async fn test_equal_results_render_once_from_cache() {
        let cache = Arc::new(MapCache::with("plain architecture", scenario_payload()));
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Json(scenario_payload())));

        let (outcome, events) = run(cache, fetcher, "plain architecture").await;

        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
        let rendered = renders(&events);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].0, RenderSource::Cache);
    }

    #[tokio::test]
    async fn test_key_order_does_not_count_as_difference() {
        let cached = json!({"books": [{"price": "$10", "title": "T"}]});
        let fresh: Value = serde_json::from_str(r#"{"books":[{"title":"T","price":"$10"}]}"#).unwrap();
        let cache = Arc::new(MapCache::with("t", cached));
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Json(fresh)));

        let (_, events) = run(cache, fetcher, "t").await;
        assert_eq!(renders(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_different_network_result_renders_after_cache() {
        let cache = Arc::new(MapCache::with("q", json!({"books": [{"title": "Old"}]})));
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Json(json!({"books": [{"title": "New"}]}))));

        let (outcome, events) = run(cache, fetcher, "q").await;

        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Network, renders: 2 });
        let rendered = renders(&events);
        assert_eq!(rendered[0].0, RenderSource::Cache);
        assert_eq!(rendered[0].1.books[0].title, "Old");
        assert_eq!(rendered[1].0, RenderSource::Network);
        assert_eq!(rendered[1].1.books[0].title, "New");
    }

    #[tokio::test]
    async fn test_network_failure_keeps_cache_result() {
        let cache = Arc::new(MapCache::with("q", scenario_payload()));
        let fetcher = ScriptedFetcher::new(Reply::Fail);

        let (outcome, events) = run(cache, fetcher, "q").await;

        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
        assert!(!events.contains(&SearchEvent::Failed));
        assert_eq!(renders(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_without_cache_fails() {
        let (outcome, events) = run(Arc::new(MapCache::default()), ScriptedFetcher::new(Reply::Fail), "q").await;

        assert_eq!(outcome, QueryOutcome::Failed);
        assert!(renders(&events).is_empty());
        assert_eq!(events.last(), Some(&SearchEvent::Failed));
    }

    #[tokio::test]
    async fn test_non_success_without_cache_fails() {
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::NoData { status: 503 }));
        let (outcome, _) = run(Arc::new(MapCache::default()), fetcher, "q").await;
        assert_eq!(outcome, QueryOutcome::Failed);
    }

    #[tokio::test]
    async fn test_text_response_after_cache_keeps_cache() {
        let cache = Arc::new(MapCache::with("q", scenario_payload()));
        let fetcher = ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Text("<html>".into())));
        let (outcome, events) = run(cache, fetcher, "q").await;
        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
        assert_eq!(renders(&events).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_cache_keeps_cache() {
        let cache = Arc::new(MapCache::with("q", scenario_payload()));
        let fetcher = ScriptedFetcher::new(Reply::Hang);

        let (outcome, _) = run(cache, fetcher, "q").await;

        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_cache_fails() {
        let (outcome, _) = run(Arc::new(MapCache::default()), ScriptedFetcher::new(Reply::Hang), "q").await;
        assert_eq!(outcome, QueryOutcome::Failed);
    }

    #[tokio::test]
    async fn test_loading_hidden_before_first_render() {
        let (_, events) = run(
            Arc::new(MapCache::default()),
            ScriptedFetcher::new(Reply::Outcome(FetchOutcome::Json(scenario_payload()))),
            "q",
        )
        .await;
        assert_eq!(events[0], SearchEvent::Loading(true));
        assert_eq!(events[1], SearchEvent::Loading(false));
        assert!(matches!(events[2], SearchEvent::Render { source: RenderSource::Network, .. }));
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_baseline() {
        let cache = Arc::new(MapCache::with("plain architecture", scenario_payload()));
        let fetcher = ScriptedFetcher::new(Reply::Fail);

        let (outcome, _) = run(cache, fetcher, "  plain architecture  ").await;
        assert_eq!(outcome, QueryOutcome::Rendered { last: RenderSource::Cache, renders: 1 });
    }

    struct GatedFetcher {
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn get(&self, url: &str) -> Result<FetchOutcome, Error> {
            if url.contains("q=old") {
                self.gate.notified().await;
            }
            Ok(FetchOutcome::Json(json!({"books": [{"title": url}]})))
        }

        async fn post_json(&self, _url: &str, _body: &Value) -> Result<FetchOutcome, Error> {
            unreachable!()
        }
    }

    async fn stale_race(discard_stale: bool) -> (QueryOutcome, QueryOutcome) {
        let fetcher = Arc::new(GatedFetcher { gate: tokio::sync::Notify::new() });
        let orchestrator = QueryOrchestrator::new(Arc::new(MapCache::default()), fetcher.clone(), BASE)
            .with_discard_stale(discard_stale);
        let (tx, _rx) = mpsc::unbounded_channel::<SearchEvent>();

        let old = {
            let orchestrator = orchestrator.clone();
            let tx = tx.clone();
            tokio::spawn(async move { orchestrator.search("old", &tx).await })
        };
        while orchestrator.sequence.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let new = orchestrator.search("new", &tx).await;
        fetcher.gate.notify_one();
        (old.await.unwrap(), new)
    }

    #[tokio::test]
    async fn test_stale_result_renders_by_default() {
        let (old, new) = stale_race(false).await;
        assert_eq!(new, QueryOutcome::Rendered { last: RenderSource::Network, renders: 1 });
        assert_eq!(old, QueryOutcome::Rendered { last: RenderSource::Network, renders: 1 });
    }

    #[tokio::test]
    async fn test_stale_result_dropped_when_enabled() {
        let (old, new) = stale_race(true).await;
        assert_eq!(new, QueryOutcome::Rendered { last: RenderSource::Network, renders: 1 });
        assert_eq!(old, QueryOutcome::Superseded);
    }
}
