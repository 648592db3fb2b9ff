//! Shared types for sync operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Which adapter variant is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Local,
    Cloud,
    Hybrid,
}

/// Sync state reported to the UI. One instance per Hybrid/Cloud adapter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub has_unsynced_changes: bool,
    pub last_error: Option<String>,
    /// Remote pushes currently in flight.
    pub pending_push_count: usize,
}

/// Shared, clonable handle to a [`SyncStatus`].
///
/// Adapters and background tasks update it; the UI snapshots it.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<SyncStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status by value.
    pub fn snapshot(&self) -> SyncStatus {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set_syncing(&self, syncing: bool) {
        if let Ok(mut s) = self.inner.write() {
            s.is_syncing = syncing;
        }
    }

    pub fn set_unsynced(&self, unsynced: bool) {
        if let Ok(mut s) = self.inner.write() {
            s.has_unsynced_changes = unsynced;
        }
    }

    /// Records a confirmed remote write.
    pub fn record_sync(&self, at: DateTime<Utc>) {
        if let Ok(mut s) = self.inner.write() {
            s.last_sync = Some(at);
            s.last_error = None;
        }
    }

    /// Records a failed remote leg; the entry stays dirty for retry.
    pub fn record_error(&self, error: impl Into<String>) {
        if let Ok(mut s) = self.inner.write() {
            s.last_error = Some(error.into());
        }
    }

    pub fn set_pending(&self, count: usize) {
        if let Ok(mut s) = self.inner.write() {
            s.pending_push_count = count;
        }
    }
}

/// Kind of change detected by the poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MapCreated,
    MapUpdated,
    MapDeleted,
    SyncError,
}

/// A change event emitted by the poller to its subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapChangeEvent {
    pub kind: ChangeKind,
    pub map_id: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MapChangeEvent {
    pub fn created(map_id: &str, updated_at: DateTime<Utc>) -> Self {
        Self {
            kind: ChangeKind::MapCreated,
            map_id: Some(map_id.to_string()),
            payload: serde_json::json!({ "updated_at": updated_at }),
            timestamp: Utc::now(),
        }
    }

    pub fn updated(map_id: &str, updated_at: DateTime<Utc>) -> Self {
        Self {
            kind: ChangeKind::MapUpdated,
            map_id: Some(map_id.to_string()),
            payload: serde_json::json!({ "updated_at": updated_at }),
            timestamp: Utc::now(),
        }
    }

    pub fn deleted(map_id: &str) -> Self {
        Self {
            kind: ChangeKind::MapDeleted,
            map_id: Some(map_id.to_string()),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn sync_error(message: &str) -> Self {
        Self {
            kind: ChangeKind::SyncError,
            map_id: None,
            payload: serde_json::json!({ "message": message }),
            timestamp: Utc::now(),
        }
    }
}
