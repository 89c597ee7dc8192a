//! HTTP response cache operations.
//!
//! Entries are written by the network-interception layer and read by the
//! query orchestrator. A request key is the canonical URL of the request.

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// A stored response body with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub body: String,
    pub content_type: Option<String>,
    pub stored_at: String,
}

impl CacheDb {
    /// Get a cached response by request key.
    ///
    /// Returns None on a cache miss.
    pub async fn get_response(&self, request_key: &str) -> Result<Option<CachedResponse>, Error> {
        let key_hash = compute_cache_key(request_key);
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn
                    .prepare("SELECT url, body, content_type, stored_at FROM response_cache WHERE key_hash = ?1")?;

                let result = stmt.query_row(params![key_hash], |row| {
                    Ok(CachedResponse { url: row.get(0)?, body: row.get(1)?, content_type: row.get(2)?, stored_at: row.get(3)? })
                });

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(tokio_rusqlite::rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace the response stored for a request key.
    pub async fn put_response(&self, request_key: &str, body: &str, content_type: Option<&str>) -> Result<(), Error> {
        let key_hash = compute_cache_key(request_key);
        let url = request_key.to_string();
        let body = body.to_string();
        let content_type = content_type.map(str::to_string);
        let stored_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO response_cache (key_hash, url, body, content_type, stored_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(key_hash) DO UPDATE SET
                        url = excluded.url,
                        body = excluded.body,
                        content_type = excluded.content_type,
                        stored_at = excluded.stored_at",
                    params![key_hash, url, body, content_type, stored_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete responses stored more than `days` ago.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_responses_older_than(&self, days: i64) -> Result<u64, Error> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM response_cache WHERE stored_at < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Purge oldest responses until count <= max_entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_lru_responses(&self, max_entries: usize) -> Result<u64, Error> {
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = conn.execute(
                    "DELETE FROM response_cache WHERE key_hash IN (
                    SELECT key_hash FROM response_cache ORDER BY stored_at ASC LIMIT ?1
                )",
                    params![count - max],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
