//! Cloud storage adapter.
//!
//! Maintains a per-user local mirror and reconciles it against the
//! remote document store. Reads prefer availability: remote trouble
//! degrades to mirrored (or default) data. Writes are write-through:
//! the mirror is updated synchronously and marked dirty, then the
//! remote push runs as a tracked background task that clears the dirty
//! flag on confirmation. Conflict policy is last-writer-wins — update
//! first, create only when the document is absent remotely.

use crate::adapter::{ReadyGate, StorageAdapter};
use crate::api_client::{push_map_once, MapApiClient};
use crate::auth::AuthProvider;
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::janitor::CacheJanitor;
use crate::push::PushTracker;
use crate::types::{StorageMode, StatusHandle, SyncStatus};
use async_trait::async_trait;
use chrono::Utc;
use mindloom_storage::MapStore;
use mindloom_types::MindMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Storage adapter backed by the per-user cloud mirror plus the remote
/// document store.
pub struct CloudAdapter {
    mirror: MapStore,
    api: Arc<MapApiClient>,
    auth: Arc<dyn AuthProvider>,
    config: CloudConfig,
    gate: ReadyGate,
    pushes: PushTracker,
    status: StatusHandle,
    cancel: CancellationToken,
}

impl CloudAdapter {
    pub fn new(
        mirror: MapStore,
        api: Arc<MapApiClient>,
        auth: Arc<dyn AuthProvider>,
        config: CloudConfig,
    ) -> Self {
        Self {
            mirror,
            api,
            auth,
            config,
            gate: ReadyGate::new(),
            pushes: PushTracker::new(),
            status: StatusHandle::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The cloud-scope mirror store.
    pub fn mirror(&self) -> &MapStore {
        &self.mirror
    }

    /// The remote store client.
    pub fn api(&self) -> &Arc<MapApiClient> {
        &self.api
    }

    /// Tracker for in-flight background pushes. Tests await quiescence
    /// through it.
    pub fn pushes(&self) -> &PushTracker {
        &self.pushes
    }

    pub fn status_handle(&self) -> &StatusHandle {
        &self.status
    }

    /// Aggregate sync state: recorded status plus live dirty/pending
    /// counts.
    pub fn sync_status(&self) -> SyncStatus {
        let mut s = self.status.snapshot();
        s.pending_push_count = self.pushes.pending_count();
        let dirty = self
            .auth
            .current_user()
            .and_then(|u| self.mirror.list_dirty(&u).ok())
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        s.has_unsynced_changes = dirty || s.pending_push_count > 0;
        s.is_syncing = s.pending_push_count > 0;
        s
    }

    /// Persists a default document to the mirror only. Failure is
    /// logged — the in-memory copy remains valid for the session.
    fn persist_locally(&self, map: &MindMap, user: &str) {
        if let Err(e) = self.mirror.save_current(map) {
            warn!("failed to persist current document: {e}");
        }
        if let Err(e) = self.mirror.record_local_write(map, user) {
            warn!("failed to record mirror entry for {}: {e}", map.id);
        }
    }

    /// Spawns the asynchronous remote leg for one document. The mirror
    /// entry's dirty flag is cleared only on a confirmed write of the
    /// pushed version.
    fn spawn_push(&self, map: MindMap, version: i64) {
        let (guard, _task) = self.pushes.register();
        let api = self.api.clone();
        let mirror = self.mirror.clone();
        let status = self.status.clone();
        let pushes = self.pushes.clone();
        let cancel = self.cancel.clone();
        status.set_syncing(true);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("push for {} abandoned on teardown", map.id);
                    guard.failure("cancelled");
                }
                result = push_map_once(&api, &map) => match result {
                    Ok(canonical) => {
                        let now = Utc::now();
                        match mirror.mark_clean_if_version(&canonical.id, version, now) {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!("document {} changed during push, left dirty", canonical.id)
                            }
                            Err(e) => warn!("failed to clear dirty flag for {}: {e}", canonical.id),
                        }
                        status.record_sync(now);
                        guard.success();
                    }
                    Err(e) => {
                        // Entry stays dirty for the scheduler's retry
                        warn!("remote push for {} failed: {e}", map.id);
                        status.record_error(e.to_string());
                        guard.failure(e.to_string());
                    }
                }
            }
            status.set_syncing(pushes.pending_count() > 0);
        });
    }

    /// Spawns the asynchronous remote delete for one document id.
    fn spawn_delete(&self, id: String) {
        let (guard, _task) = self.pushes.register();
        let api = self.api.clone();
        let status = self.status.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    guard.failure("cancelled");
                }
                result = api.delete_map(&id) => match result {
                    Ok(()) => guard.success(),
                    Err(e) => {
                        warn!("remote delete for {id} failed: {e}");
                        status.record_error(e.to_string());
                        guard.failure(e.to_string());
                    }
                }
            }
        });
    }
}

#[async_trait]
impl StorageAdapter for CloudAdapter {
    async fn initialize(&self) -> CloudResult<()> {
        // Janitor is one-shot per initialization and must never block it
        if let Some(user) = self.auth.current_user() {
            let protect = self
                .mirror
                .load_current()
                .ok()
                .flatten()
                .map(|m| m.id);
            let janitor = CacheJanitor::new(self.config.clone());
            match janitor.run(&self.mirror, &user, protect.as_deref()) {
                Ok(report) if !report.skipped => {
                    debug!(
                        "janitor for {user}: {} expired, {} excess",
                        report.ttl_evicted, report.capacity_evicted
                    )
                }
                Ok(_) => {}
                Err(e) => warn!("cache janitor failed: {e}"),
            }
        }
        self.gate.open();
        Ok(())
    }

    async fn load_initial_data(&self) -> CloudResult<MindMap> {
        self.gate.wait(self.config.init_timeout()).await?;

        let user = match self.auth.current_user() {
            Some(u) => u,
            // Without an identity there is no mirror entry to own;
            // serve whatever is cached, or a fresh template.
            None => {
                return Ok(self
                    .mirror
                    .load_current()
                    .ok()
                    .flatten()
                    .unwrap_or_else(MindMap::with_default_template))
            }
        };

        let cached = match self.mirror.load_current() {
            Ok(c) => c,
            Err(e) => {
                warn!("mirror read failed during startup: {e}");
                None
            }
        };

        // Availability over consistency: an unhealthy remote never
        // blocks startup.
        if !self.api.health().await {
            debug!("remote unhealthy, serving mirror data");
            return Ok(match cached {
                Some(map) => map,
                None => {
                    let map = MindMap::with_default_template();
                    self.persist_locally(&map, &user);
                    map
                }
            });
        }

        match self.api.list_maps().await {
            // Server wins on read
            Ok(remote) if !remote.is_empty() => {
                let map = cached
                    .as_ref()
                    .and_then(|c| remote.iter().find(|r| r.id == c.id).cloned())
                    .unwrap_or_else(|| remote[0].clone());
                if let Err(e) = self.mirror.save_current(&map) {
                    warn!("failed to mirror current document: {e}");
                }
                if let Err(e) = self.mirror.record_remote_copy(&map, &user) {
                    warn!("failed to mirror entry for {}: {e}", map.id);
                }
                Ok(map)
            }
            Ok(_) => {
                if let Some(map) = cached {
                    return Ok(map);
                }
                // First run anywhere: create the default template,
                // persist it locally, and try the remote create in the
                // background — its failure is logged, not surfaced.
                let map = MindMap::with_default_template();
                self.persist_locally(&map, &user);
                let version = self
                    .mirror
                    .get_entry(&map.id)
                    .ok()
                    .flatten()
                    .map(|e| e.version)
                    .unwrap_or(1);
                self.spawn_push(map.clone(), version);
                Ok(map)
            }
            Err(e) => {
                warn!("remote list failed during startup: {e}");
                Ok(match cached {
                    Some(map) => map,
                    None => {
                        let map = MindMap::with_default_template();
                        self.persist_locally(&map, &user);
                        map
                    }
                })
            }
        }
    }

    async fn save_data(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;

        // Synchronous leg: mirror write-through, errors propagate
        self.mirror.save_current(map)?;
        let version = self.mirror.record_local_write(map, &user)?;

        self.spawn_push(map.clone(), version);
        Ok(())
    }

    async fn load_all_maps(&self) -> CloudResult<Vec<MindMap>> {
        self.gate.wait(self.config.init_timeout()).await?;

        // Unauthenticated listing is empty, not an error
        let user = match self.auth.current_user() {
            Some(u) => u,
            None => return Ok(Vec::new()),
        };

        if !self.api.health().await {
            return Ok(self.mirror.list_maps(&user).unwrap_or_default());
        }

        match self.api.list_maps().await {
            Ok(remote) => {
                for map in &remote {
                    // A dirty mirror entry is local truth awaiting push;
                    // never overwrite it with the remote copy
                    let dirty = matches!(
                        self.mirror.get_entry(&map.id),
                        Ok(Some(entry)) if entry.is_dirty
                    );
                    if !dirty {
                        if let Err(e) = self.mirror.record_remote_copy(map, &user) {
                            warn!("failed to mirror {}: {e}", map.id);
                        }
                    }
                }
                Ok(self.mirror.list_maps(&user).unwrap_or_default())
            }
            Err(e) => {
                warn!("remote list failed, serving mirror: {e}");
                Ok(self.mirror.list_maps(&user).unwrap_or_default())
            }
        }
    }

    async fn save_all_maps(&self, maps: &[MindMap]) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;

        let mut versions = Vec::with_capacity(maps.len());
        for map in maps {
            versions.push((map.id.clone(), self.mirror.record_local_write(map, &user)?));
        }

        // Bulk upsert in one background task
        let (guard, _task) = self.pushes.register();
        let api = self.api.clone();
        let mirror = self.mirror.clone();
        let status = self.status.clone();
        let cancel = self.cancel.clone();
        let maps = maps.to_vec();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    guard.failure("cancelled");
                }
                result = api.sync_maps(&maps) => match result {
                    Ok(_) => {
                        let now = Utc::now();
                        for (id, version) in versions {
                            if let Err(e) = mirror.mark_clean_if_version(&id, version, now) {
                                warn!("failed to clear dirty flag for {id}: {e}");
                            }
                        }
                        status.record_sync(now);
                        guard.success();
                    }
                    Err(e) => {
                        warn!("bulk sync failed: {e}");
                        status.record_error(e.to_string());
                        guard.failure(e.to_string());
                    }
                }
            }
        });
        Ok(())
    }

    async fn add_map_to_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;
        let version = self.mirror.record_local_write(map, &user)?;
        self.spawn_push(map.clone(), version);
        Ok(())
    }

    async fn remove_map_from_list(&self, id: &str) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.mirror.delete_entry(id)?;
        self.spawn_delete(id.to_string());
        Ok(())
    }

    async fn update_map_in_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;
        let version = self.mirror.record_local_write(map, &user)?;
        self.spawn_push(map.clone(), version);
        Ok(())
    }

    async fn cleanup(&self) -> CloudResult<()> {
        self.cancel.cancel();
        self.gate.close();
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Cloud
    }
}
