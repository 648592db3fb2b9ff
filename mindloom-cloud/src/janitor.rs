//! Startup cache janitor.
//!
//! One-shot eviction routine run on adapter initialization, rate
//! limited to once per day per user through a persisted timestamp.
//! Two passes, in order: a TTL pass removing mirror entries whose last
//! sync is older than the configured window, then a capacity pass
//! trimming the user's entry count down to the configured maximum,
//! oldest first. The document currently open in the editor is never
//! evicted. Eviction touches only the local mirror — a later load
//! re-fetches from remote if needed.

use crate::config::CloudConfig;
use crate::error::CloudResult;
use chrono::{Duration, Utc};
use mindloom_storage::MapStore;
use tracing::{debug, info};

/// What a janitor run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JanitorReport {
    /// True when the run was suppressed by the daily rate limit.
    pub skipped: bool,
    pub ttl_evicted: usize,
    pub capacity_evicted: usize,
}

/// One-shot startup eviction over a user's mirror entries.
pub struct CacheJanitor {
    config: CloudConfig,
}

impl CacheJanitor {
    pub fn new(config: CloudConfig) -> Self {
        Self { config }
    }

    /// Runs both passes for `owner`, protecting `open_map_id`.
    ///
    /// Callers swallow and log errors — janitor failure must never
    /// block adapter initialization.
    pub fn run(
        &self,
        mirror: &MapStore,
        owner: &str,
        open_map_id: Option<&str>,
    ) -> CloudResult<JanitorReport> {
        let now = Utc::now();

        if let Some(last_run) = mirror.janitor_last_run(owner)? {
            let min_gap = Duration::hours(self.config.janitor_min_interval_hours);
            if now - last_run < min_gap {
                debug!("janitor already ran for {owner} within {min_gap}, skipping");
                return Ok(JanitorReport {
                    skipped: true,
                    ..JanitorReport::default()
                });
            }
        }

        let cutoff = now - Duration::days(self.config.cache_ttl_days);
        let ttl_evicted = mirror.evict_older_than(owner, cutoff, open_map_id)?;

        let capacity_evicted =
            mirror.evict_capacity_excess(owner, self.config.cache_max_entries, open_map_id)?;

        mirror.set_janitor_last_run(owner, now)?;

        if ttl_evicted > 0 || capacity_evicted > 0 {
            info!(
                "janitor evicted {ttl_evicted} expired and {capacity_evicted} excess entries for {owner}"
            );
        }

        Ok(JanitorReport {
            skipped: false,
            ttl_evicted,
            capacity_evicted,
        })
    }
}
