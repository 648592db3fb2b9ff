//! Polling-based change detection.
//!
//! The server has no push channel, so remote changes are detected by
//! periodically fetching the document list and diffing it against an
//! in-memory snapshot of `id -> last known updated_at`. The diff is a
//! pure function so it can be tested in isolation. A failed pass emits
//! `sync_error` and does not stop the timer — the loop self-heals on
//! the next tick.

use crate::api_client::MapApiClient;
use crate::config::CloudConfig;
use crate::types::{ChangeKind, MapChangeEvent, StorageMode};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The poller's last-known `id -> updated_at` map.
pub type Snapshot = HashMap<String, DateTime<Utc>>;

/// Diffs two snapshots into change events.
///
/// Emits exactly one `map_created` per id only in `new`, one
/// `map_deleted` per id only in `old`, one `map_updated` per id in both
/// with a differing timestamp, and nothing else. Output is ordered by
/// id within each kind so results are deterministic.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<MapChangeEvent> {
    let mut events = Vec::new();

    let mut new_ids: Vec<&String> = new.keys().collect();
    new_ids.sort();
    for id in new_ids {
        match old.get(id) {
            None => events.push(MapChangeEvent::created(id, new[id])),
            Some(prev) if *prev != new[id] => {
                events.push(MapChangeEvent::updated(id, new[id]))
            }
            Some(_) => {}
        }
    }

    let mut gone: Vec<&String> = old.keys().filter(|id| !new.contains_key(*id)).collect();
    gone.sort();
    for id in gone {
        events.push(MapChangeEvent::deleted(id));
    }

    events
}

/// Opaque subscription handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registry {
    next_id: u64,
    listeners: HashMap<u64, (Option<ChangeKind>, mpsc::UnboundedSender<MapChangeEvent>)>,
}

enum PollerState {
    Stopped,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
}

/// Two-state (stopped/running) change poller.
///
/// Starting performs an immediate pass, then arms a recurring timer at
/// the configured frequency (clamped to a 1s floor, with optional
/// jitter). Each pass is a no-op unless the active mode is Cloud.
pub struct ChangePoller {
    api: Arc<MapApiClient>,
    mode: StorageMode,
    config: CloudConfig,
    snapshot: Arc<Mutex<Snapshot>>,
    registry: Arc<Mutex<Registry>>,
    state: Mutex<PollerState>,
}

impl ChangePoller {
    pub fn new(api: Arc<MapApiClient>, mode: StorageMode, config: CloudConfig) -> Self {
        Self {
            api,
            mode,
            config,
            snapshot: Arc::new(Mutex::new(Snapshot::new())),
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
            state: Mutex::new(PollerState::Stopped),
        }
    }

    /// The interval the timer actually uses: configured frequency
    /// clamped to the 1s minimum.
    pub fn effective_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    /// Subscribes to one event kind, or to everything with `None`.
    pub fn subscribe(
        &self,
        kind: Option<ChangeKind>,
    ) -> (ListenerId, mpsc::UnboundedReceiver<MapChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, (kind, tx));
        (ListenerId(id), rx)
    }

    /// Removes a subscription. Idempotent — unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.listeners.remove(&id.0);
        }
    }

    fn emit(&self, events: Vec<MapChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let mut registry = match self.registry.lock() {
            Ok(r) => r,
            Err(_) => return,
        };
        // Drop listeners whose receiver is gone
        registry.listeners.retain(|_, (_, tx)| !tx.is_closed());
        for event in events {
            for (filter, tx) in registry.listeners.values() {
                if filter.is_none() || *filter == Some(event.kind) {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }

    /// One polling pass. No-op unless the active mode is Cloud; a
    /// failed fetch emits `sync_error` and returns normally.
    pub async fn poll_once(&self) {
        if self.mode != StorageMode::Cloud {
            return;
        }

        match self.api.list_maps().await {
            Ok(remote) => {
                let fresh: Snapshot = remote
                    .iter()
                    .map(|m| (m.id.clone(), m.updated_at))
                    .collect();
                let events = {
                    let mut snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
                    let events = diff_snapshots(&snapshot, &fresh);
                    // Wholesale replacement so stale entries cannot persist
                    *snapshot = fresh;
                    events
                };
                if !events.is_empty() {
                    debug!("poll pass produced {} change events", events.len());
                }
                self.emit(events);
            }
            Err(e) => {
                warn!("poll pass failed: {e}");
                self.emit(vec![MapChangeEvent::sync_error(&e.to_string())]);
            }
        }
    }

    /// Stopped → Running: immediate pass, then the recurring timer.
    /// Starting a running poller is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if matches!(*state, PollerState::Running { .. }) {
            return;
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            this.poll_once().await;
            loop {
                let delay = this.effective_interval() + this.jitter();
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => this.poll_once().await,
                }
            }
        });

        *state = PollerState::Running { cancel, handle };
        info!(
            "change poller started ({}ms effective interval)",
            self.effective_interval().as_millis()
        );
    }

    /// Running → Stopped. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if let PollerState::Running { cancel, handle } =
            std::mem::replace(&mut *state, PollerState::Stopped)
        {
            cancel.cancel();
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().expect("state mutex poisoned"),
            PollerState::Running { .. }
        )
    }

    fn jitter(&self) -> Duration {
        if self.config.poll_jitter_ms == 0 {
            return Duration::ZERO;
        }
        use rand::Rng;
        Duration::from_millis(rand::rng().random_range(0..=self.config.poll_jitter_ms))
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
