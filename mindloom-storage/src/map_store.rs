//! Mirror store for mind-map documents.
//!
//! Documents are stored as JSON in a `map_list` table keyed by id, with
//! plaintext metadata columns (owner, title, dirty flag, version, sync
//! timestamps) so that sync and eviction queries never deserialize the
//! document body. A `current_map` singleton row holds the document open
//! in the editor, and `janitor_runs` persists per-user janitor
//! rate-limit timestamps.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, TimeZone, Utc};
use duckdb::{params, Connection};
use mindloom_types::MindMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Which physical database a store is bound to.
///
/// The two scopes are separate files so purely-local documents and the
/// per-user cloud mirror cannot contaminate each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreScope {
    Local,
    Cloud,
}

impl StoreScope {
    /// Database file name for this scope.
    pub fn file_name(self) -> &'static str {
        match self {
            StoreScope::Local => "local.db",
            StoreScope::Cloud => "cloud.db",
        }
    }
}

/// A mirrored document plus its sync metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub map: MindMap,
    pub owner_user_id: String,
    /// Local write counter. Incremented on every local write; an optimism
    /// marker, not a distributed version.
    pub version: i64,
    /// True when the entry has local changes not yet confirmed remotely.
    pub is_dirty: bool,
    pub last_sync: DateTime<Utc>,
}

/// Mirror store backed by DuckDB. One instance per [`StoreScope`].
#[derive(Clone)]
pub struct MapStore {
    conn: Arc<Mutex<Connection>>,
}

impl MapStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 2)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens the store for a scope inside `dir`.
    pub fn open_scope(dir: &Path, scope: StoreScope) -> StorageResult<Self> {
        Self::open(&dir.join(scope.file_name()))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("store mutex poisoned".into()))
    }

    // ── Current document singleton ───────────────────────────────

    /// Saves the document currently open in the editor.
    pub fn save_current(&self, map: &MindMap) -> StorageResult<()> {
        let data_json = serde_json::to_string(map)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO current_map (slot, data_json, updated_at) VALUES (0, ?, ?)",
            params![data_json, millis(Utc::now())],
        )?;
        Ok(())
    }

    /// Loads the current document, if one has been saved.
    pub fn load_current(&self) -> StorageResult<Option<MindMap>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT data_json FROM current_map WHERE slot = 0",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the current-document row.
    pub fn clear_current(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM current_map WHERE slot = 0", [])?;
        Ok(())
    }

    // ── Document list ────────────────────────────────────────────

    /// Records a local write: upserts the document, increments the
    /// version counter, marks the entry dirty, and stamps `last_sync`
    /// with the write time. Returns the new version.
    pub fn record_local_write(&self, map: &MindMap, owner: &str) -> StorageResult<i64> {
        let data_json = serde_json::to_string(map)?;
        let conn = self.lock()?;

        let prev: Option<i64> = match conn.query_row(
            "SELECT version FROM map_list WHERE id = ?",
            params![map.id],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        let version = prev.unwrap_or(0) + 1;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO map_list (
                id, owner_user_id, title, data_json,
                version, is_dirty, last_sync, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, TRUE, ?, ?, ?)
            "#,
            params![
                map.id,
                owner,
                map.title,
                data_json,
                version,
                millis(Utc::now()),
                millis(map.created_at),
                millis(map.updated_at),
            ],
        )?;
        Ok(version)
    }

    /// Records a document copied down from the remote store: upserts it
    /// clean (not dirty), preserving any existing version counter.
    pub fn record_remote_copy(&self, map: &MindMap, owner: &str) -> StorageResult<()> {
        let data_json = serde_json::to_string(map)?;
        let conn = self.lock()?;

        let prev: i64 = match conn.query_row(
            "SELECT version FROM map_list WHERE id = ?",
            params![map.id],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(duckdb::Error::QueryReturnedNoRows) => 0,
            Err(e) => return Err(e.into()),
        };

        conn.execute(
            r#"
            INSERT OR REPLACE INTO map_list (
                id, owner_user_id, title, data_json,
                version, is_dirty, last_sync, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, FALSE, ?, ?, ?)
            "#,
            params![
                map.id,
                owner,
                map.title,
                data_json,
                prev,
                millis(Utc::now()),
                millis(map.created_at),
                millis(map.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Gets a single entry by id.
    pub fn get_entry(&self, id: &str) -> StorageResult<Option<CacheEntry>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT data_json, owner_user_id, version, is_dirty, last_sync \
             FROM map_list WHERE id = ?",
            params![id],
            row_to_parts,
        );
        match result {
            Ok(parts) => Ok(Some(parts_to_entry(parts)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists all entries owned by `owner`, most recently synced first.
    pub fn list_entries(&self, owner: &str) -> StorageResult<Vec<CacheEntry>> {
        self.query_entries(
            "SELECT data_json, owner_user_id, version, is_dirty, last_sync \
             FROM map_list WHERE owner_user_id = ? ORDER BY last_sync DESC",
            owner,
        )
    }

    /// Lists all documents owned by `owner` (metadata stripped).
    pub fn list_maps(&self, owner: &str) -> StorageResult<Vec<MindMap>> {
        Ok(self.list_entries(owner)?.into_iter().map(|e| e.map).collect())
    }

    /// Lists entries with unsynced local changes for `owner`, oldest
    /// write first so the scheduler drains in write order.
    pub fn list_dirty(&self, owner: &str) -> StorageResult<Vec<CacheEntry>> {
        self.query_entries(
            "SELECT data_json, owner_user_id, version, is_dirty, last_sync \
             FROM map_list WHERE owner_user_id = ? AND is_dirty ORDER BY last_sync ASC",
            owner,
        )
    }

    fn query_entries(&self, sql: &str, owner: &str) -> StorageResult<Vec<CacheEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<RowParts> = stmt
            .query_map(params![owner], row_to_parts)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut entries = Vec::with_capacity(rows.len());
        for parts in rows {
            entries.push(parts_to_entry(parts)?);
        }
        Ok(entries)
    }

    /// Deletes an entry by id.
    pub fn delete_entry(&self, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM map_list WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Clears the dirty flag after a confirmed remote write and stamps
    /// the sync time.
    pub fn mark_clean(&self, id: &str, synced_at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE map_list SET is_dirty = FALSE, last_sync = ? WHERE id = ?",
            params![millis(synced_at), id],
        )?;
        Ok(())
    }

    /// Clears the dirty flag only if the entry's version still matches
    /// `version`. A push confirms exactly the content it carried; a
    /// newer local write keeps its dirty flag until its own push lands.
    /// Returns true when the flag was cleared.
    pub fn mark_clean_if_version(
        &self,
        id: &str,
        version: i64,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE map_list SET is_dirty = FALSE, last_sync = ? WHERE id = ? AND version = ?",
            params![millis(synced_at), id, version],
        )?;
        Ok(changed > 0)
    }

    /// Clears the dirty flag only if the stored document is not newer
    /// than `updated_at`. Used when the confirming push came from a
    /// different store than the one being cleaned, where version
    /// counters do not line up.
    pub fn mark_clean_if_not_newer(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE map_list SET is_dirty = FALSE, last_sync = ? WHERE id = ? AND updated_at <= ?",
            params![millis(synced_at), id, millis(updated_at)],
        )?;
        Ok(changed > 0)
    }

    /// Re-marks an entry dirty (a losing concurrent write's failure path).
    pub fn mark_dirty(&self, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE map_list SET is_dirty = TRUE WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Counts entries owned by `owner`.
    pub fn count_for_owner(&self, owner: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM map_list WHERE owner_user_id = ?",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Eviction support ─────────────────────────────────────────

    /// Removes entries for `owner` whose `last_sync` is older than
    /// `cutoff`, skipping `protect`. Returns the number removed.
    pub fn evict_older_than(
        &self,
        owner: &str,
        cutoff: DateTime<Utc>,
        protect: Option<&str>,
    ) -> StorageResult<usize> {
        let conn = self.lock()?;
        let protect = protect.unwrap_or("");
        let removed = conn.execute(
            "DELETE FROM map_list WHERE owner_user_id = ? AND last_sync < ? AND id != ?",
            params![owner, millis(cutoff), protect],
        )?;
        Ok(removed)
    }

    /// If `owner` holds more than `max` entries, removes the oldest
    /// excess by `last_sync`, skipping `protect`. Returns the number
    /// removed.
    pub fn evict_capacity_excess(
        &self,
        owner: &str,
        max: usize,
        protect: Option<&str>,
    ) -> StorageResult<usize> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM map_list WHERE owner_user_id = ? ORDER BY last_sync ASC",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![owner], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        if ids.len() <= max {
            return Ok(0);
        }
        let excess = ids.len() - max;

        let mut removed = 0usize;
        for id in ids {
            if removed >= excess {
                break;
            }
            if Some(id.as_str()) == protect {
                continue;
            }
            conn.execute("DELETE FROM map_list WHERE id = ?", params![id])?;
            removed += 1;
        }
        Ok(removed)
    }

    // ── Janitor rate limiting ────────────────────────────────────

    /// Last janitor run for `owner`, if recorded.
    pub fn janitor_last_run(&self, owner: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT last_run FROM janitor_runs WHERE owner_user_id = ?",
            params![owner],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(ms) => Ok(Some(from_millis(ms))),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the janitor run timestamp for `owner`.
    pub fn set_janitor_last_run(&self, owner: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO janitor_runs (owner_user_id, last_run) VALUES (?, ?)",
            params![owner, millis(at)],
        )?;
        Ok(())
    }
}

type RowParts = (String, String, i64, bool, i64);

fn row_to_parts(row: &duckdb::Row<'_>) -> Result<RowParts, duckdb::Error> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, i64>(2)?,
        row.get::<_, bool>(3)?,
        row.get::<_, i64>(4)?,
    ))
}

fn parts_to_entry(parts: RowParts) -> StorageResult<CacheEntry> {
    let (data_json, owner_user_id, version, is_dirty, last_sync) = parts;
    Ok(CacheEntry {
        map: serde_json::from_str(&data_json)?,
        owner_user_id,
        version,
        is_dirty,
        last_sync: from_millis(last_sync),
    })
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS current_map (
            slot INTEGER PRIMARY KEY,
            data_json TEXT NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS map_list (
            id VARCHAR PRIMARY KEY,
            owner_user_id VARCHAR NOT NULL,
            title VARCHAR,
            data_json TEXT NOT NULL,
            version BIGINT NOT NULL,
            is_dirty BOOLEAN NOT NULL DEFAULT FALSE,
            last_sync BIGINT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_map_list_owner ON map_list(owner_user_id);
        CREATE INDEX IF NOT EXISTS idx_map_list_dirty ON map_list(owner_user_id, is_dirty);
        CREATE INDEX IF NOT EXISTS idx_map_list_last_sync ON map_list(last_sync);

        -- Janitor rate limiting: one persisted timestamp per user so the
        -- eviction passes run at most once per day.
        CREATE TABLE IF NOT EXISTS janitor_runs (
            owner_user_id VARCHAR PRIMARY KEY,
            last_run BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
