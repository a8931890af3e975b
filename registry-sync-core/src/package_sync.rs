//! Per-package synchronisation: fetch, staleness check, project, store.
//!
//! `sync` never fails. Every per-package problem ends up either as a deletion
//! (the registry says the package is gone) or as a stale-set entry that the
//! sweeper retries later, so one bad package cannot hold up the change feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::contract::{Origin, PackageDocument};
use crate::error::OriginError;
use crate::projector::project;
use crate::store::PackageStore;

/// Whether a change was observed while catching up or while live-tailing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// `seq` is at or before the feed head seen at boot.
    Replaying,
    /// `seq` is past the boot head.
    Live,
}

impl SyncMode {
    pub fn for_seq(seq: u64, boot_head: u64) -> Self {
        if seq > boot_head {
            SyncMode::Live
        } else {
            SyncMode::Replaying
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Stored,
    /// Stored, but the document looked stale and was queued for a re-fetch.
    StoredStale,
    Deleted,
    /// Nothing stored; queued for the sweeper.
    Deferred,
}

pub struct PackageSynchronizer {
    origin: Arc<dyn Origin>,
    store: PackageStore,
    catch_up_delay: Duration,
    stale_threshold: Duration,
}

impl PackageSynchronizer {
    pub fn new(
        origin: Arc<dyn Origin>,
        store: PackageStore,
        catch_up_delay: Duration,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            origin,
            store,
            catch_up_delay,
            stale_threshold,
        }
    }

    pub async fn sync(&self, name: &str, mode: SyncMode) -> SyncOutcome {
        if mode == SyncMode::Live {
            tokio::time::sleep(self.catch_up_delay).await;
        }

        let document = match self.origin.fetch(name).await {
            Ok(document) => document,
            Err(OriginError::NotFound { .. }) => return self.remove(name).await,
            Err(e) => {
                warn!(package = %name, error = %e, "Fetch failed, queueing for retry");
                self.defer(name).await;
                return SyncOutcome::Deferred;
            }
        };

        let stale = mode == SyncMode::Live && self.looks_stale(name, &document);
        if stale {
            warn!(package = %name, "Registry data may be stale, will retry later");
            if let Err(e) = self.store.enqueue_stale(name).await {
                error!(package = %name, error = %e, "Failed to queue stale package");
            }
        }

        if let Err(e) = self.store.put_package(name, &project(&document)).await {
            error!(package = %name, error = %e, "Failed to store package");
            self.defer(name).await;
            return SyncOutcome::Deferred;
        }
        info!(package = %name, ?mode, "Stored package");

        if stale {
            SyncOutcome::StoredStale
        } else {
            SyncOutcome::Stored
        }
    }

    async fn remove(&self, name: &str) -> SyncOutcome {
        info!(package = %name, "Package no longer in registry, removing");
        if let Err(e) = self.store.delete_package(name).await {
            error!(package = %name, error = %e, "Failed to delete package");
            self.defer(name).await;
            return SyncOutcome::Deferred;
        }
        if let Err(e) = self.store.dequeue_stale(name).await {
            error!(package = %name, error = %e, "Failed to dequeue deleted package");
        }
        SyncOutcome::Deleted
    }

    async fn defer(&self, name: &str) {
        if let Err(e) = self.store.enqueue_stale(name).await {
            error!(package = %name, error = %e, "Failed to queue package for retry");
        }
    }

    fn looks_stale(&self, name: &str, document: &PackageDocument) -> bool {
        let Some(modified) = document.modified() else {
            debug!(package = %name, "No time.modified on document, skipping staleness check");
            return false;
        };
        Utc::now()
            .signed_duration_since(modified)
            .to_std()
            .map(|age| age > self.stale_threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_boundary_is_inclusive_of_boot_head() {
        assert_eq!(SyncMode::for_seq(99, 100), SyncMode::Replaying);
        assert_eq!(SyncMode::for_seq(100, 100), SyncMode::Replaying);
        assert_eq!(SyncMode::for_seq(101, 100), SyncMode::Live);
    }
}
