//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine and its background tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL for the document store API (e.g., "https://api.mindloom.app").
    pub api_base_url: String,

    /// How long adapter calls wait for `initialize()` before failing
    /// with `InitializationTimeout` (milliseconds).
    pub init_timeout_ms: u64,

    /// Background sync scheduler tick interval (seconds).
    pub sync_interval_secs: u64,

    /// Cap for per-entry retry backoff in the scheduler (seconds).
    pub sync_backoff_cap_secs: u64,

    /// Change poller frequency (milliseconds). Clamped to a 1s minimum
    /// when the poller starts.
    pub poll_interval_ms: u64,

    /// Random jitter added to each poll interval (milliseconds, 0 = none).
    pub poll_jitter_ms: u64,

    /// Mirror entries whose last sync is older than this are evicted (days).
    pub cache_ttl_days: i64,

    /// Maximum mirror entries kept per user.
    pub cache_max_entries: usize,

    /// Minimum gap between janitor runs per user (hours).
    pub janitor_min_interval_hours: i64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mindloom.app".to_string(),
            init_timeout_ms: 10_000,
            sync_interval_secs: 30,
            sync_backoff_cap_secs: 30 * 60,
            poll_interval_ms: 5_000,
            poll_jitter_ms: 0,
            cache_ttl_days: 30,
            cache_max_entries: 100,
            janitor_min_interval_hours: 24,
        }
    }
}

impl CloudConfig {
    /// Poll interval clamped to the 1s floor, jitter not applied.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1_000))
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sync_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.sync_backoff_cap_secs)
    }
}
