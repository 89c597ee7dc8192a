//! Unified error types for shelf.
//!
//! The first five variants form the offline-orchestration taxonomy; the rest
//! cover persistence and input plumbing.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the client, server and CLI.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network abort, connection error or timeout.
    #[error("TRANSPORT_ERROR: {0}")]
    Transport(String),

    /// No persistence capability, or the store failed to open/upgrade.
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),

    /// Notification permission resolved to something other than `granted`.
    #[error("PERMISSION_DENIED: permission state is {0}")]
    PermissionDenied(String),

    /// The push service rejected subscription creation.
    #[error("SUBSCRIPTION_FAILED: {0}")]
    SubscriptionFailed(String),

    /// Submitting the subscription failed or returned a non-success status.
    #[error("SERVER_REGISTRATION_FAILED: {0}")]
    ServerRegistrationFailed(String),

    /// The background execution context is gone or never started.
    #[error("WORKER_UNAVAILABLE: {0}")]
    WorkerUnavailable(String),

    /// Invalid input parameters (e.g., an empty tag).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Upstream search API answered with an error.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored JSON could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    Corrupt(String),
}

impl Error {
    /// Stable machine-readable code, the prefix of the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            Error::ServerRegistrationFailed(_) => "SERVER_REGISTRATION_FAILED",
            Error::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Database(_) | Error::MigrationFailed(_) | Error::Corrupt(_) => "CACHE_ERROR",
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}
