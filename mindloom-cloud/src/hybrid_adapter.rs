//! Hybrid storage adapter.
//!
//! Composes the local and cloud adapters: reads always return the
//! local result immediately, writes hit local storage synchronously
//! (bounding user-visible latency) and mirror to the cloud in the
//! background. When authenticated, reads also trigger a background
//! reconciliation pass that pulls remote-only documents down and
//! propagates remote deletions — skipping entries with unpushed local
//! edits. `force_sync` is the manual, synchronous-error-surfacing
//! variant for explicit user-triggered retry.

use crate::adapter::{ReadyGate, StorageAdapter};
use crate::api_client::push_map_once;
use crate::auth::AuthProvider;
use crate::cloud_adapter::CloudAdapter;
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::local_adapter::{LocalAdapter, LOCAL_OWNER};
use crate::push::PushTracker;
use crate::types::{StorageMode, SyncStatus};
use async_trait::async_trait;
use chrono::Utc;
use mindloom_types::MindMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Storage adapter composing local persistence with cloud mirroring.
pub struct HybridAdapter {
    local: Arc<LocalAdapter>,
    cloud: Arc<CloudAdapter>,
    auth: Arc<dyn AuthProvider>,
    config: CloudConfig,
    gate: ReadyGate,
    /// Background mirroring/reconciliation tasks, tracked so status is
    /// queryable and tests can await quiescence.
    background: PushTracker,
    cancel: CancellationToken,
}

impl HybridAdapter {
    pub fn new(
        local: Arc<LocalAdapter>,
        cloud: Arc<CloudAdapter>,
        auth: Arc<dyn AuthProvider>,
        config: CloudConfig,
    ) -> Self {
        Self {
            local,
            cloud,
            auth,
            config,
            gate: ReadyGate::new(),
            background: PushTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn background(&self) -> &PushTracker {
        &self.background
    }

    /// Aggregate sync state across both legs.
    pub fn sync_status(&self) -> SyncStatus {
        let mut s = self.cloud.sync_status();
        s.pending_push_count += self.background.pending_count();
        let local_dirty = self
            .local
            .store()
            .list_dirty(LOCAL_OWNER)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        s.has_unsynced_changes = s.has_unsynced_changes || local_dirty || s.pending_push_count > 0;
        s.is_syncing = s.is_syncing || self.background.pending_count() > 0;
        s
    }

    /// One reconciliation pass against the remote list. Public so the
    /// caller can run it eagerly; background passes go through
    /// [`Self::spawn_reconcile`].
    pub async fn reconcile(&self) -> CloudResult<()> {
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;
        reconcile_pass(&self.cloud, &self.local, &user).await
    }

    /// Spawns a tracked background reconciliation pass.
    fn spawn_reconcile(&self) {
        let (guard, _task) = self.background.register();
        let cloud = Arc::clone(&self.cloud);
        let local = Arc::clone(&self.local);
        let auth = Arc::clone(&self.auth);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let user = match auth.current_user() {
                Some(u) => u,
                None => {
                    guard.failure("unauthenticated");
                    return;
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    guard.failure("cancelled");
                }
                result = reconcile_pass(&cloud, &local, &user) => match result {
                    Ok(()) => guard.success(),
                    Err(e) => {
                        warn!("background reconciliation failed: {e}");
                        cloud.status_handle().record_error(e.to_string());
                        guard.failure(e.to_string());
                    }
                }
            }
        });
    }

    /// Spawns the asynchronous cloud leg for one locally-saved map.
    fn spawn_mirror_push(&self, map: MindMap, local_version: i64) {
        let (guard, _task) = self.background.register();
        let cloud = Arc::clone(&self.cloud);
        let local = Arc::clone(&self.local);
        let auth = Arc::clone(&self.auth);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let user = match auth.current_user() {
                Some(u) => u,
                None => {
                    // Offline/unauthenticated: the local entry stays
                    // dirty until force_sync or a later session
                    debug!("skipping cloud leg for {}: unauthenticated", map.id);
                    guard.failure("unauthenticated");
                    return;
                }
            };

            let mirror = cloud.mirror();
            let mirror_version = match mirror.record_local_write(&map, &user) {
                Ok(v) => v,
                Err(e) => {
                    warn!("cloud mirror write for {} failed: {e}", map.id);
                    cloud.status_handle().record_error(e.to_string());
                    guard.failure(e.to_string());
                    return;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    guard.failure("cancelled");
                }
                result = push_map_once(cloud.api(), &map) => match result {
                    Ok(canonical) => {
                        let now = Utc::now();
                        if let Err(e) = mirror.mark_clean_if_version(&canonical.id, mirror_version, now) {
                            warn!("failed to clear mirror dirty flag for {}: {e}", canonical.id);
                        }
                        if let Err(e) = local.store().mark_clean_if_version(&canonical.id, local_version, now) {
                            warn!("failed to clear local dirty flag for {}: {e}", canonical.id);
                        }
                        cloud.status_handle().record_sync(now);
                        guard.success();
                    }
                    Err(e) => {
                        // Mirror entry stays dirty; the scheduler retries
                        warn!("cloud push for {} failed: {e}", map.id);
                        cloud.status_handle().record_error(e.to_string());
                        guard.failure(e.to_string());
                    }
                }
            }
        });
    }

    async fn force_sync_inner(&self, user: &str) -> CloudResult<()> {
        let api = self.cloud.api();
        let mirror = self.cloud.mirror();
        let local = self.local.store();

        // Push offline local writes first — entries that never reached
        // the mirror because there was no authenticated user
        for entry in local.list_dirty(LOCAL_OWNER)? {
            let canonical = push_map_once(api, &entry.map).await?;
            let now = Utc::now();
            local.mark_clean_if_version(&entry.map.id, entry.version, now)?;
            mirror.record_remote_copy(&canonical, user)?;
        }

        // Then drain dirty mirror entries
        for entry in mirror.list_dirty(user)? {
            push_map_once(api, &entry.map).await?;
            let now = Utc::now();
            mirror.mark_clean_if_version(&entry.map.id, entry.version, now)?;
            local.mark_clean_if_not_newer(&entry.map.id, entry.map.updated_at, now)?;
        }

        reconcile_pass(&self.cloud, &self.local, user).await
    }

    /// Manual sync: pushes everything unsynced and reconciles, with
    /// errors surfaced synchronously instead of swallowed.
    pub async fn force_sync(&self) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let user = self.auth.current_user().ok_or(CloudError::AuthRequired)?;

        let status = self.cloud.status_handle();
        status.set_syncing(true);
        let result = self.force_sync_inner(&user).await;
        status.set_syncing(false);

        match &result {
            Ok(()) => status.record_sync(Utc::now()),
            Err(e) => status.record_error(e.to_string()),
        }
        result
    }

    fn local_version_of(&self, id: &str) -> CloudResult<i64> {
        Ok(self
            .local
            .store()
            .get_entry(id)?
            .map(|e| e.version)
            .unwrap_or(1))
    }
}

/// Pull remote-only documents down and propagate remote deletions,
/// guarded so dirty entries are never clobbered.
async fn reconcile_pass(
    cloud: &CloudAdapter,
    local: &LocalAdapter,
    user: &str,
) -> CloudResult<()> {
    if !cloud.api().health().await {
        return Err(CloudError::RemoteUnreachable("health check failed".into()));
    }
    let remote = cloud.api().list_maps().await?;
    let mirror = cloud.mirror();
    let local_store = local.store();

    for map in &remote {
        if local_store.get_entry(&map.id)?.is_none() {
            debug!("pulling remote document {} into local store", map.id);
            local_store.record_remote_copy(map, LOCAL_OWNER)?;
        }
        match mirror.get_entry(&map.id)? {
            Some(entry) if entry.is_dirty => {}
            _ => mirror.record_remote_copy(map, user)?,
        }
    }

    let remote_ids: HashSet<&str> = remote.iter().map(|m| m.id.as_str()).collect();
    for entry in mirror.list_entries(user)? {
        let id = entry.map.id.as_str();
        if remote_ids.contains(id) {
            continue;
        }
        if entry.is_dirty {
            // Deleted remotely but edited locally — the pending push
            // wins and recreates it
            debug!("keeping dirty entry {id} despite remote deletion");
            continue;
        }
        mirror.delete_entry(id)?;
        if let Some(local_entry) = local_store.get_entry(id)? {
            if !local_entry.is_dirty {
                local_store.delete_entry(id)?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl StorageAdapter for HybridAdapter {
    async fn initialize(&self) -> CloudResult<()> {
        self.local.initialize().await?;
        self.cloud.initialize().await?;
        self.gate.open();
        Ok(())
    }

    async fn load_initial_data(&self) -> CloudResult<MindMap> {
        self.gate.wait(self.config.init_timeout()).await?;
        let map = self.local.load_initial_data().await?;
        if self.auth.is_authenticated() {
            self.spawn_reconcile();
        }
        Ok(map)
    }

    async fn save_data(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;

        // Synchronous leg: local write, errors propagate
        self.local.save_data(map).await?;
        let local_version = self.local_version_of(&map.id)?;

        self.spawn_mirror_push(map.clone(), local_version);
        Ok(())
    }

    async fn load_all_maps(&self) -> CloudResult<Vec<MindMap>> {
        self.gate.wait(self.config.init_timeout()).await?;
        let maps = self.local.load_all_maps().await?;
        if self.auth.is_authenticated() {
            self.spawn_reconcile();
        }
        Ok(maps)
    }

    async fn save_all_maps(&self, maps: &[MindMap]) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.local.save_all_maps(maps).await?;
        for map in maps {
            let local_version = self.local_version_of(&map.id)?;
            self.spawn_mirror_push(map.clone(), local_version);
        }
        Ok(())
    }

    async fn add_map_to_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.local.add_map_to_list(map).await?;
        let local_version = self.local_version_of(&map.id)?;
        self.spawn_mirror_push(map.clone(), local_version);
        Ok(())
    }

    async fn remove_map_from_list(&self, id: &str) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.local.remove_map_from_list(id).await?;
        if self.auth.is_authenticated() {
            self.cloud.remove_map_from_list(id).await?;
        }
        Ok(())
    }

    async fn update_map_in_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.local.update_map_in_list(map).await?;
        let local_version = self.local_version_of(&map.id)?;
        self.spawn_mirror_push(map.clone(), local_version);
        Ok(())
    }

    async fn cleanup(&self) -> CloudResult<()> {
        self.cancel.cancel();
        self.gate.close();
        self.local.cleanup().await?;
        self.cloud.cleanup().await?;
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Hybrid
    }
}
