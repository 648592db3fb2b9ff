//! Storage adapter capability interface.
//!
//! Three polymorphic variants implement [`StorageAdapter`]: local,
//! cloud, and hybrid. Calls issued before `initialize()` completes
//! transparently await readiness through a [`ReadyGate`] instead of
//! failing; `cleanup()` closes the gate so teardown mid-startup aborts
//! waiters and leaves no dangling timer.

use crate::error::{CloudError, CloudResult};
use crate::types::StorageMode;
use async_trait::async_trait;
use mindloom_types::MindMap;
use std::time::Duration;
use tokio::sync::watch;

/// Capability interface over document persistence.
///
/// Read failures degrade to cached/default data and never raise; write
/// failures on the synchronous leg propagate to the caller.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Prepares the adapter. Idempotent; opens the readiness gate.
    async fn initialize(&self) -> CloudResult<()>;

    /// Loads the document to open in the editor, creating a default
    /// template when no data exists anywhere.
    async fn load_initial_data(&self) -> CloudResult<MindMap>;

    /// Persists the current document.
    async fn save_data(&self, map: &MindMap) -> CloudResult<()>;

    /// Lists all documents visible to the current user.
    async fn load_all_maps(&self) -> CloudResult<Vec<MindMap>>;

    /// Replaces the stored document list with `maps`.
    async fn save_all_maps(&self, maps: &[MindMap]) -> CloudResult<()>;

    async fn add_map_to_list(&self, map: &MindMap) -> CloudResult<()>;

    async fn remove_map_from_list(&self, id: &str) -> CloudResult<()>;

    async fn update_map_in_list(&self, map: &MindMap) -> CloudResult<()>;

    /// Stops background work and closes the readiness gate.
    async fn cleanup(&self) -> CloudResult<()>;

    fn mode(&self) -> StorageMode;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Pending,
    Ready,
    Closed,
}

/// Readiness latch shared by an adapter and its callers.
///
/// Operations wait on the gate with a timeout; `initialize()` opens it,
/// `cleanup()` closes it (aborting waiters).
#[derive(Clone)]
pub struct ReadyGate {
    tx: watch::Sender<GateState>,
    rx: watch::Receiver<GateState>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(GateState::Pending);
        Self { tx, rx }
    }

    /// Marks the adapter ready; all pending waiters proceed.
    pub fn open(&self) {
        let _ = self.tx.send(GateState::Ready);
    }

    /// Closes the gate; pending and future waiters fail with `Shutdown`.
    pub fn close(&self) {
        let _ = self.tx.send(GateState::Closed);
    }

    pub fn is_open(&self) -> bool {
        *self.rx.borrow() == GateState::Ready
    }

    /// Awaits readiness, failing with `InitializationTimeout` after
    /// `timeout` or `Shutdown` if the gate is closed.
    pub async fn wait(&self, timeout: Duration) -> CloudResult<()> {
        let mut rx = self.rx.clone();
        let wait = async move {
            loop {
                match *rx.borrow_and_update() {
                    GateState::Ready => return Ok(()),
                    GateState::Closed => return Err(CloudError::Shutdown),
                    GateState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(CloudError::Shutdown);
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::InitializationTimeout(timeout)),
        }
    }
}
