//! SQLite-backed HTTP response cache.
//!
//! This module provides a persistent, URL-keyed response cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Request keys hashed with SHA-256
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Age and LRU purge strategies
//! - Storage of push subscription registrations for the proxy

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod responses;
pub mod subscriptions;

pub use crate::Error;

pub use connection::CacheDb;
pub use responses::CachedResponse;
