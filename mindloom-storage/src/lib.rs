//! DuckDB storage layer for Mindloom.
//!
//! Persists the local mirror of mind-map documents. Two physically
//! separate databases are used — one for the "local" scope and one for
//! the "cloud" scope — so that purely-local data and the per-user cloud
//! mirror never contaminate each other.
//!
//! # Architecture
//!
//! - Each scope holds a `current_map` singleton row and a `map_list`
//!   collection keyed by id, the latter carrying sync metadata
//!   (owner, version, dirty flag, last-sync timestamp)
//! - Documents are stored as JSON blobs with indexed plaintext columns
//! - Schema is created automatically on open

mod error;
mod map_store;

pub use error::{StorageError, StorageResult};
pub use map_store::{CacheEntry, MapStore, StoreScope};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the
/// database, it is removed and the open is retried once. This handles the
/// common case where an unclean shutdown leaves a WAL file that prevents
/// reopening.
///
/// `memory_limit` and `threads` cap per-database resource usage (DuckDB
/// defaults to ~80% of system RAM and all cores, which is far too
/// aggressive when both scope databases are open concurrently).
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
