//! Network-interception layer: records successful GET responses in the
//! HTTP response cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shelf_core::{CacheDb, Error};

use super::{FetchOutcome, Fetcher};

/// Fetcher wrapper that writes every JSON GET response into the cache,
/// keyed by the requested URL.
#[derive(Clone)]
pub struct CachingFetcher {
    inner: Arc<dyn Fetcher>,
    cache: CacheDb,
}

impl CachingFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, cache: CacheDb) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn get(&self, url: &str) -> Result<FetchOutcome, Error> {
        let outcome = self.inner.get(url).await?;

        if let FetchOutcome::Json(value) = &outcome
            && let Err(e) = self.cache.put_response(url, &value.to_string(), Some("application/json")).await
        {
            tracing::warn!(event = "cache.write_failed", url, "failed to cache response: {}", e);
        }

        Ok(outcome)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<FetchOutcome, Error> {
        self.inner.post_json(url, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(FetchOutcome);

    #[async_trait]
    impl Fetcher for Fixed {
        async fn get(&self, _url: &str) -> Result<FetchOutcome, Error> {
            Ok(self.0.clone())
        }

        async fn post_json(&self, _url: &str, _body: &Value) -> Result<FetchOutcome, Error> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_json_get_is_cached() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let fetcher = CachingFetcher::new(Arc::new(Fixed(FetchOutcome::Json(json!({"books": []})))), cache.clone());

        fetcher.get("http://h/book?q=a").await.unwrap();

        let entry = cache.get_response("http://h/book?q=a").await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&entry.body).unwrap(), json!({"books": []}));
    }

    #[tokio::test]
    async fn test_no_data_and_posts_are_not_cached() {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let failing = CachingFetcher::new(Arc::new(Fixed(FetchOutcome::NoData { status: 502 })), cache.clone());
        failing.get("http://h/book?q=a").await.unwrap();
        assert!(cache.get_response("http://h/book?q=a").await.unwrap().is_none());

        let posting = CachingFetcher::new(Arc::new(Fixed(FetchOutcome::Json(json!({})))), cache.clone());
        posting.post_json("http://h/sync", &json!({})).await.unwrap();
        assert!(cache.get_response("http://h/sync").await.unwrap().is_none());
    }
}
