//! High-level pipeline: keeps the cache in sync with the registry until something fatal happens.
//!
//! [`synchronise`] wires the components together:
//!   - a [`ChangeStreamConsumer`] tailing the change feed from the persisted cursor
//!   - a [`StaleSweeper`] re-fetching suspect packages on its own timer
//!   - a [`LivenessWatchdog`] watching the consumer's heartbeat
//!
//! The consumer and watchdog are raced; whichever fails first ends the run.
//! The sweeper is aborted on the way out. There is no in-process restart: the
//! caller is expected to exit non-zero and let the supervisor start it again.
//!
//! # Callable From
//! - The `registry-sync` binary and integration tests.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::SyncConfig;
use crate::consumer::ChangeStreamConsumer;
use crate::contract::{Cache, ChangeFeed, Origin};
use crate::error::SyncError;
use crate::package_sync::PackageSynchronizer;
use crate::store::PackageStore;
use crate::sweeper::StaleSweeper;
use crate::watchdog::{Heartbeat, LivenessWatchdog};

/// Run the mirror. Only returns with the fatal error that stopped it.
pub async fn synchronise(
    config: &SyncConfig,
    origin: Arc<dyn Origin>,
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<dyn Cache>,
) -> Result<(), SyncError> {
    config.validate()?;
    info!("[SYNC] Starting registry mirror");

    let store = PackageStore::new(cache);
    let heartbeat = Heartbeat::new();

    let synchronizer = Arc::new(PackageSynchronizer::new(
        origin.clone(),
        store.clone(),
        config.catch_up_delay,
        config.stale_threshold,
    ));
    let consumer = ChangeStreamConsumer::new(
        feed,
        synchronizer,
        store.clone(),
        heartbeat.clone(),
        config.concurrency,
    );
    let watchdog = LivenessWatchdog::new(
        heartbeat,
        config.liveness_check_interval,
        config.liveness_timeout,
    );
    let sweeper = StaleSweeper::new(origin, store, config.sweep_interval);
    let sweeper = tokio::spawn(sweeper.run());

    let result = tokio::select! {
        result = consumer.run() => result,
        fatal = watchdog.run() => Err(fatal),
    };
    sweeper.abort();

    if let Err(e) = &result {
        error!(error = %e, "[SYNC][ERROR] Registry mirror stopped");
    }
    result
}
