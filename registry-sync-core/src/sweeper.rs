//! Periodic re-fetch of packages in the stale set.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::contract::Origin;
use crate::error::{CacheError, OriginError};
use crate::projector::project;
use crate::store::PackageStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Re-fetched, stored and dequeued.
    pub refreshed: usize,
    /// Gone from the registry; any leftover record deleted and dequeued.
    pub removed: usize,
    /// Left in the stale set for the next sweep.
    pub failed: usize,
}

enum Retry {
    Refreshed,
    Removed,
    Failed,
}

pub struct StaleSweeper {
    origin: Arc<dyn Origin>,
    store: PackageStore,
    interval: Duration,
}

impl StaleSweeper {
    pub fn new(origin: Arc<dyn Origin>, store: PackageStore, interval: Duration) -> Self {
        Self {
            origin,
            store,
            interval,
        }
    }

    /// Sweep forever. The first sweep happens one interval after start, and a
    /// sweep is never started while the previous one is still running.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(report) => info!(?report, "Stale sweep finished"),
                Err(e) => error!(error = %e, "Stale sweep could not read the stale set"),
            }
        }
    }

    /// Re-fetch every current member of the stale set concurrently.
    pub async fn sweep(&self) -> Result<SweepReport, CacheError> {
        let names = self.store.stale_packages().await?;
        if names.is_empty() {
            return Ok(SweepReport::default());
        }
        info!(count = names.len(), packages = ?names, "Refetching potentially stale packages");

        let outcomes = join_all(names.iter().map(|name| self.retry(name))).await;

        let mut report = SweepReport::default();
        for outcome in outcomes {
            match outcome {
                Retry::Refreshed => report.refreshed += 1,
                Retry::Removed => report.removed += 1,
                Retry::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    async fn retry(&self, name: &str) -> Retry {
        match self.origin.fetch(name).await {
            Ok(document) => {
                if let Err(e) = self.store.put_package(name, &project(&document)).await {
                    error!(package = %name, error = %e, "Failed to store refreshed package");
                    return Retry::Failed;
                }
                if let Err(e) = self.store.dequeue_stale(name).await {
                    error!(package = %name, error = %e, "Failed to dequeue refreshed package");
                    return Retry::Failed;
                }
                info!(package = %name, "Refreshed stale package");
                Retry::Refreshed
            }
            Err(OriginError::NotFound { .. }) => {
                if let Err(e) = self.store.delete_package(name).await {
                    error!(package = %name, error = %e, "Failed to delete missing package");
                    return Retry::Failed;
                }
                if let Err(e) = self.store.dequeue_stale(name).await {
                    error!(package = %name, error = %e, "Failed to dequeue missing package");
                    return Retry::Failed;
                }
                info!(package = %name, "Removed package gone from the registry");
                Retry::Removed
            }
            Err(e) => {
                warn!(package = %name, error = %e, "Error fetching stale package");
                Retry::Failed
            }
        }
    }
}
