//! Database connection management with pragma configuration.
//!
//! This module handles opening SQLite databases, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use super::migrations::{self, CACHE_MIGRATIONS, Migrations};
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Open `path` (or an in-memory database when `None`), apply pragmas and
/// run `migrations`. Returns the connection and the schema version found
/// before migrating.
pub(crate) async fn open_with(path: Option<&Path>, migrations: Migrations) -> Result<(Connection, i64), Error> {
    let conn = match path {
        Some(path) => Connection::open(path).await,
        None => Connection::open_in_memory().await,
    }
    .map_err(|e| Error::Database(e.into()))?;

    conn.call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
    })
    .await
    .map_err(Error::Database)?;

    let previous = migrations::run(&conn, migrations).await?;

    Ok((conn, previous))
}

/// HTTP response cache handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let (conn, _) = open_with(Some(path.as_ref()), CACHE_MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let (conn, _) = open_with(None, CACHE_MIGRATIONS).await?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let version = db
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_open_file_reports_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let (_, first) = open_with(Some(&path), CACHE_MIGRATIONS).await.unwrap();
        assert_eq!(first, 0);

        let (_, second) = open_with(Some(&path), CACHE_MIGRATIONS).await.unwrap();
        assert_eq!(second, CACHE_MIGRATIONS.len() as i64);
    }
}
