//! Local-only storage adapter.
//!
//! All operations hit the "local"-scope mirror store; there is no
//! network leg. The only failure surface is the persistent store
//! itself.

use crate::adapter::{ReadyGate, StorageAdapter};
use crate::config::CloudConfig;
use crate::error::CloudResult;
use crate::types::StorageMode;
use async_trait::async_trait;
use mindloom_storage::MapStore;
use mindloom_types::MindMap;
use tracing::warn;

/// Owner key used for local-scope entries. The local store is
/// single-user; authentication plays no part in it.
pub const LOCAL_OWNER: &str = "local";

/// Storage adapter over the local-scope store only.
pub struct LocalAdapter {
    store: MapStore,
    gate: ReadyGate,
    config: CloudConfig,
}

impl LocalAdapter {
    pub fn new(store: MapStore, config: CloudConfig) -> Self {
        Self {
            store,
            gate: ReadyGate::new(),
            config,
        }
    }

    /// The underlying store, shared with the hybrid adapter.
    pub fn store(&self) -> &MapStore {
        &self.store
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    async fn initialize(&self) -> CloudResult<()> {
        self.gate.open();
        Ok(())
    }

    async fn load_initial_data(&self) -> CloudResult<MindMap> {
        self.gate.wait(self.config.init_timeout()).await?;
        match self.store.load_current() {
            Ok(Some(map)) => Ok(map),
            Ok(None) => {
                let map = MindMap::with_default_template();
                self.store.save_current(&map)?;
                self.store.record_local_write(&map, LOCAL_OWNER)?;
                Ok(map)
            }
            Err(e) => {
                // Reads degrade to the default template rather than fail
                warn!("local read failed, serving default template: {e}");
                Ok(MindMap::with_default_template())
            }
        }
    }

    async fn save_data(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.store.save_current(map)?;
        self.store.record_local_write(map, LOCAL_OWNER)?;
        Ok(())
    }

    async fn load_all_maps(&self) -> CloudResult<Vec<MindMap>> {
        self.gate.wait(self.config.init_timeout()).await?;
        match self.store.list_maps(LOCAL_OWNER) {
            Ok(maps) => Ok(maps),
            Err(e) => {
                warn!("local list failed, serving empty list: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn save_all_maps(&self, maps: &[MindMap]) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        let keep: Vec<&str> = maps.iter().map(|m| m.id.as_str()).collect();
        for existing in self.store.list_entries(LOCAL_OWNER)? {
            if !keep.contains(&existing.map.id.as_str()) {
                self.store.delete_entry(&existing.map.id)?;
            }
        }
        for map in maps {
            self.store.record_local_write(map, LOCAL_OWNER)?;
        }
        Ok(())
    }

    async fn add_map_to_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.store.record_local_write(map, LOCAL_OWNER)?;
        Ok(())
    }

    async fn remove_map_from_list(&self, id: &str) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.store.delete_entry(id)?;
        Ok(())
    }

    async fn update_map_in_list(&self, map: &MindMap) -> CloudResult<()> {
        self.gate.wait(self.config.init_timeout()).await?;
        self.store.record_local_write(map, LOCAL_OWNER)?;
        Ok(())
    }

    async fn cleanup(&self) -> CloudResult<()> {
        self.gate.close();
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Local
    }
}
