//! Core types and shared functionality for shelf.
//!
//! This crate provides:
//! - HTTP response cache with SQLite backend
//! - Persistent local store for sync payloads
//! - Unified error types
//! - Configuration structures
//! - Push types shared by client and server

pub mod cache;
pub mod config;
pub mod error;
pub mod push;
pub mod store;

pub use cache::{CacheDb, CachedResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use push::{PermissionState, PushSubscription, SubscriptionKeys, SubscriptionRegistration};
pub use store::{LocalStore, StoredItem, SyncItem};
