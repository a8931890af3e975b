use std::time::Duration;
use tracing::{debug, info};

use crate::error::SyncError;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";
pub const DEFAULT_CHANGES_URL: &str = "https://replicate.npmjs.com/_changes";

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Tunables for the mirror pipeline. `Default` gives the production values.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the registry document endpoint.
    pub registry_url: String,
    /// URL of the CouchDB-style `_changes` endpoint.
    pub changes_url: String,
    /// Maximum number of package synchronisations in flight at once.
    pub concurrency: usize,
    /// Delay before fetching a package changed after boot, giving the
    /// registry's read replicas time to catch up.
    pub catch_up_delay: Duration,
    /// Backoff between retries on 503 from the registry or a transient feed error.
    pub retry_delay: Duration,
    /// A live fetch whose `time.modified` is older than this is flagged stale.
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
    pub liveness_timeout: Duration,
    pub liveness_check_interval: Duration,
    /// Max changes requested per long-poll.
    pub feed_batch_size: usize,
    pub feed_poll_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            changes_url: DEFAULT_CHANGES_URL.to_string(),
            concurrency: 8,
            catch_up_delay: Duration::from_millis(7500),
            retry_delay: Duration::from_secs(5),
            stale_threshold: HOUR,
            sweep_interval: 6 * MINUTE,
            liveness_timeout: 10 * MINUTE,
            liveness_check_interval: MINUTE,
            feed_batch_size: 500,
            feed_poll_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.feed_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "feed_batch_size must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("sweep_interval", self.sweep_interval),
            ("liveness_timeout", self.liveness_timeout),
            ("liveness_check_interval", self.liveness_check_interval),
        ] {
            if value.is_zero() {
                return Err(SyncError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            registry_url = %self.registry_url,
            changes_url = %self.changes_url,
            concurrency = self.concurrency,
            catch_up_delay_ms = self.catch_up_delay.as_millis() as u64,
            stale_threshold_s = self.stale_threshold.as_secs(),
            sweep_interval_s = self.sweep_interval.as_secs(),
            liveness_timeout_s = self.liveness_timeout.as_secs(),
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
