//! Persistent local store for outbound sync payloads.
//!
//! One collection, `SyncData`, keyed by `tag` with a non-unique secondary
//! index `SyncDataIndex` on the same column. Every write is a single upsert
//! statement, so repeated writes for a tag are last-write-wins.

mod item;

pub use item::SyncItem;

use std::path::Path;

use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use crate::Error;
use crate::cache::connection::open_with;
use crate::cache::migrations::Migrations;

/// Name of the sync payload collection.
pub const STORE_NAME: &str = "SyncData";

/// Name of the secondary index on `tag`.
pub const STORE_INDEX: &str = "SyncDataIndex";

const STORE_MIGRATIONS: Migrations = &[("1", include_str!("../../migrations/store/001_sync_data.sql"))];

/// An item as read from the store, tied to the write that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub item: SyncItem,
    record: String,
    updated_at: String,
}

/// Handle to the persistent local store.
#[derive(Clone, Debug)]
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open the store at `path`, creating and upgrading the schema on first use.
    ///
    /// # Errors
    ///
    /// Any failure to open or upgrade is reported as `Error::StoreUnavailable`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let (conn, previous) = open_with(Some(path), STORE_MIGRATIONS)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", path.display())))?;

        if previous == 0 {
            tracing::info!(path = %path.display(), store = STORE_NAME, index = STORE_INDEX, "sync store created");
        } else {
            tracing::debug!(path = %path.display(), "sync store opened");
        }

        Ok(Self { conn })
    }

    /// Open a throwaway in-memory store.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let (conn, _) = open_with(None, STORE_MIGRATIONS)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Insert or replace the item stored under `item.tag`.
    pub async fn put(&self, item: &SyncItem) -> Result<(), Error> {
        let tag = item.tag.clone();
        let record = serde_json::to_string(&item)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO SyncData (tag, record_json, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(tag) DO UPDATE SET
                        record_json = excluded.record_json,
                        updated_at = excluded.updated_at",
                    params![tag, record, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(tag = %item.tag, "sync item stored");
        Ok(())
    }

    /// Read the item stored under `tag`.
    pub async fn get(&self, tag: &str) -> Result<Option<SyncItem>, Error> {
        let stored = self.select("SELECT record_json, updated_at FROM SyncData WHERE tag = ?1", tag).await?;
        Ok(stored.map(|stored| stored.item))
    }

    /// Read the item for `tag` through the secondary index, together with the
    /// write it came from.
    pub async fn get_by_index(&self, tag: &str) -> Result<Option<StoredItem>, Error> {
        self.select(
            "SELECT record_json, updated_at FROM SyncData INDEXED BY SyncDataIndex WHERE tag = ?1",
            tag,
        )
        .await
    }

    async fn select(&self, sql: &'static str, tag: &str) -> Result<Option<StoredItem>, Error> {
        let tag = tag.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<(String, String)>, Error> {
                let row = conn
                    .query_row(sql, params![tag], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        row.map(|(record, updated_at)| -> Result<StoredItem, Error> {
            Ok(StoredItem { item: serde_json::from_str(&record)?, record, updated_at })
        })
        .transpose()
    }

    /// Remove the item stored under `tag`. Returns whether one existed.
    pub async fn delete(&self, tag: &str) -> Result<bool, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM SyncData WHERE tag = ?1", params![tag])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove `stored` only if it has not been overwritten since it was read.
    /// Returns whether it was removed.
    pub async fn delete_stored(&self, stored: &StoredItem) -> Result<bool, Error> {
        let tag = stored.item.tag.clone();
        let record = stored.record.clone();
        let updated_at = stored.updated_at.clone();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM SyncData WHERE tag = ?1 AND record_json = ?2 AND updated_at = ?3",
                    params![tag, record, updated_at],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// All stored tags in ascending order.
    pub async fn tags(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT tag FROM SyncData ORDER BY tag")?;
                let tags = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tags)
            })
            .await
            .map_err(Error::from)
    }
}
