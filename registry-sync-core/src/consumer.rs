//! Change stream consumer.
//!
//! Resumes the change feed from the persisted cursor and fans each change out
//! to the [`PackageSynchronizer`] on its own task, at most `concurrency` at a
//! time. Finished tasks report their sequence back over a channel and the
//! [`Checkpoint`] releases them for persistence strictly in feed order.
//!
//! Changes at or before the feed head observed at boot are synchronised in
//! [`SyncMode::Replaying`]; later ones in [`SyncMode::Live`].

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::contract::{ChangeEvent, ChangeFeed};
use crate::error::SyncError;
use crate::package_sync::{PackageSynchronizer, SyncMode};
use crate::store::PackageStore;
use crate::watchdog::Heartbeat;

pub struct ChangeStreamConsumer {
    feed: Arc<dyn ChangeFeed>,
    synchronizer: Arc<PackageSynchronizer>,
    store: PackageStore,
    heartbeat: Heartbeat,
    limiter: Arc<Semaphore>,
}

impl ChangeStreamConsumer {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        synchronizer: Arc<PackageSynchronizer>,
        store: PackageStore,
        heartbeat: Heartbeat,
        concurrency: usize,
    ) -> Self {
        Self {
            feed,
            synchronizer,
            store,
            heartbeat,
            limiter: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Consume the feed. Only returns on a fatal error; the end of the feed
    /// stream counts as one. Work already dispatched is allowed to finish and
    /// be acknowledged before returning.
    pub async fn run(&self) -> Result<(), SyncError> {
        let since = self.store.cursor().await?;
        let boot_head = self.feed.head_seq().await?;
        info!(since, boot_head, "Resuming change feed");

        let mut changes = self.feed.subscribe(since);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();
        let mut checkpoint = Checkpoint::new();

        let failure = loop {
            tokio::select! {
                biased;
                Some(seq) = done_rx.recv() => {
                    self.acknowledge(&mut checkpoint, seq).await?;
                }
                next = changes.next() => match next {
                    Some(Ok(event)) => {
                        self.dispatch(event, boot_head, &mut checkpoint, &done_tx).await?;
                    }
                    Some(Err(e)) => break SyncError::Feed(e),
                    None => break SyncError::FeedEnded,
                },
            }
        };

        warn!(
            error = %failure,
            in_flight = checkpoint.in_flight(),
            "Change feed stopped, draining in-flight work"
        );
        while checkpoint.in_flight() > 0 {
            match done_rx.recv().await {
                Some(seq) => self.acknowledge(&mut checkpoint, seq).await?,
                None => break,
            }
        }
        Err(failure)
    }

    async fn dispatch(
        &self,
        event: ChangeEvent,
        boot_head: u64,
        checkpoint: &mut Checkpoint,
        done: &mpsc::UnboundedSender<u64>,
    ) -> Result<(), SyncError> {
        self.heartbeat.touch();
        let seq = event.seq;
        checkpoint.track(seq);

        let Some(name) = event.id else {
            info!(seq, "Skipping change without a package id");
            return self.acknowledge(checkpoint, seq).await;
        };

        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SyncError::Dispatch(e.to_string()))?;
        let mode = SyncMode::for_seq(seq, boot_head);
        debug!(seq, package = %name, ?mode, deleted = event.deleted, "Dispatching change");

        let synchronizer = self.synchronizer.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let outcome = synchronizer.sync(&name, mode).await;
            debug!(seq, package = %name, ?outcome, "Change applied");
            drop(permit);
            // The receiver only goes away once the consumer has returned.
            let _ = done.send(seq);
        });
        Ok(())
    }

    async fn acknowledge(&self, checkpoint: &mut Checkpoint, seq: u64) -> Result<(), SyncError> {
        for released in checkpoint.complete(seq) {
            self.store.set_cursor(released).await?;
            debug!(seq = released, "Cursor advanced");
        }
        Ok(())
    }
}
