//! Offline-first sync engine for Mindloom.
//!
//! Keeps a tree-structured mind-map document consistent between a local
//! persistent mirror and a remote authoritative store, under
//! intermittent connectivity, with no push channel from the server:
//! - Storage adapters (local, cloud, hybrid) behind one capability trait
//! - Write-through mirror with dirty tracking and background sync
//! - Startup cache janitor (TTL + per-user capacity eviction)
//! - Polling-based change detection with snapshot diffing

pub mod adapter;
pub mod api_client;
pub mod auth;
pub mod cloud_adapter;
pub mod config;
pub mod error;
pub mod hybrid_adapter;
pub mod janitor;
pub mod local_adapter;
pub mod poller;
pub mod push;
pub mod sync_scheduler;
pub mod types;

pub use adapter::StorageAdapter;
pub use auth::AuthProvider;
pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use types::*;
