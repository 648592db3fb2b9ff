//! Background sync scheduler.
//!
//! Fixed-interval recurring task that pushes dirty mirror entries to
//! the remote store. Per-entry pushes within a tick are independent
//! spawned tasks, and ticks are not mutually exclusive with in-flight
//! prior-tick work — correctness rests on the dirty-flag design, not
//! on serialization. Entries that keep failing are retried with
//! bounded exponential backoff, surfaced via `SyncStatus.last_error`.
//! Teardown cancels the recurring timer and abandons in-flight
//! per-entry work through a cancellation token.

use crate::api_client::{push_map_once, MapApiClient};
use crate::auth::AuthProvider;
use crate::config::CloudConfig;
use crate::push::PushTracker;
use crate::types::StatusHandle;
use chrono::Utc;
use mindloom_storage::MapStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
struct RetryState {
    attempts: u32,
    next_due: Instant,
}

/// Periodic task draining dirty mirror entries to the remote store.
pub struct SyncScheduler {
    mirror: MapStore,
    /// Optional second store cleaned when a push confirms — the hybrid
    /// adapter points this at its local-scope store so both dirty
    /// flags agree.
    shadow: Option<MapStore>,
    api: Arc<MapApiClient>,
    auth: Arc<dyn AuthProvider>,
    config: CloudConfig,
    status: StatusHandle,
    cancel: CancellationToken,
    retries: Arc<Mutex<HashMap<String, RetryState>>>,
    pushes: PushTracker,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        mirror: MapStore,
        api: Arc<MapApiClient>,
        auth: Arc<dyn AuthProvider>,
        config: CloudConfig,
        status: StatusHandle,
    ) -> Self {
        Self {
            mirror,
            shadow: None,
            api,
            auth,
            config,
            status,
            cancel: CancellationToken::new(),
            retries: Arc::new(Mutex::new(HashMap::new())),
            pushes: PushTracker::new(),
            task: Mutex::new(None),
        }
    }

    /// Tracker for the per-entry pushes spawned by ticks.
    pub fn pushes(&self) -> &PushTracker {
        &self.pushes
    }

    /// Also clear the dirty flag in `store` when a push confirms.
    pub fn with_shadow(mut self, store: MapStore) -> Self {
        self.shadow = Some(store);
        self
    }

    /// Arms the recurring timer. Call after the owning adapter has
    /// initialized; each tick is a no-op while unauthenticated.
    pub fn start(self: &Arc<Self>) {
        let mut task = match self.task.lock() {
            Ok(t) => t,
            Err(_) => return,
        };
        if task.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.sync_interval());
            // Skip first immediate tick
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("sync scheduler loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        this.tick_once().await;
                    }
                }
            }
        }));
        info!("sync scheduler started ({}s interval)", self.config.sync_interval_secs);
    }

    /// One scheduler pass: select dirty entries for the current user
    /// and spawn an independent push for each entry that is due.
    pub async fn tick_once(&self) {
        let user = match self.auth.current_user() {
            Some(u) => u,
            None => return,
        };

        let entries = match self.mirror.list_dirty(&user) {
            Ok(e) => e,
            Err(e) => {
                warn!("dirty scan failed: {e}");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        debug!("sync tick: {} dirty entries for {user}", entries.len());

        let now = Instant::now();
        for entry in entries {
            let due = match self.retries.lock() {
                Ok(retries) => retries
                    .get(&entry.map.id)
                    .map(|s| now >= s.next_due)
                    .unwrap_or(true),
                Err(_) => true,
            };
            if !due {
                continue;
            }

            let (guard, _task) = self.pushes.register();
            let api = Arc::clone(&self.api);
            let mirror = self.mirror.clone();
            let shadow = self.shadow.clone();
            let status = self.status.clone();
            let retries = Arc::clone(&self.retries);
            let cancel = self.cancel.clone();
            let base = self.config.sync_interval();
            let cap = self.config.sync_backoff_cap();

            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("push for {} abandoned on teardown", entry.map.id);
                        guard.failure("cancelled");
                    }
                    result = push_map_once(&api, &entry.map) => match result {
                        Ok(canonical) => {
                            let now_ts = Utc::now();
                            match mirror.mark_clean_if_version(&canonical.id, entry.version, now_ts) {
                                Ok(true) => debug!("synced {}", canonical.id),
                                Ok(false) => {
                                    debug!("{} changed during push, left dirty", canonical.id)
                                }
                                Err(e) => warn!("failed to clear dirty flag for {}: {e}", canonical.id),
                            }
                            if let Some(shadow) = shadow {
                                if let Err(e) = shadow.mark_clean_if_not_newer(
                                    &canonical.id,
                                    entry.map.updated_at,
                                    now_ts,
                                ) {
                                    warn!("failed to clear shadow dirty flag for {}: {e}", canonical.id);
                                }
                            }
                            if let Ok(mut retries) = retries.lock() {
                                retries.remove(&canonical.id);
                            }
                            status.record_sync(now_ts);
                            guard.success();
                        }
                        Err(e) => {
                            // Entry stays dirty; back off before the
                            // next attempt
                            warn!("sync push for {} failed: {e}", entry.map.id);
                            status.record_error(e.to_string());
                            if let Ok(mut retries) = retries.lock() {
                                let state = retries.entry(entry.map.id.clone()).or_insert(RetryState {
                                    attempts: 0,
                                    next_due: Instant::now(),
                                });
                                state.attempts += 1;
                                state.next_due = Instant::now() + backoff_delay(base, cap, state.attempts);
                            }
                            guard.failure(e.to_string());
                        }
                    }
                }
            });
        }
    }

    /// Cancels the recurring timer and abandons in-flight pushes.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bounded exponential backoff: `interval * 2^attempts`, capped.
fn backoff_delay(base: Duration, cap: Duration, attempts: u32) -> Duration {
    let factor = 1u64 << attempts.min(16);
    let delay = base.as_secs().saturating_mul(factor);
    Duration::from_secs(delay.min(cap.as_secs()))
}
