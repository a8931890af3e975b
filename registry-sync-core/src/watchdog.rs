//! Liveness watchdog.
//!
//! The consumer touches a shared [`Heartbeat`] for every change it sees. The
//! watchdog periodically checks how long it has been since the last touch and
//! resolves with [`SyncError::LivenessTimeout`] once that exceeds the timeout.
//! Recovery is crash-only: the caller ends the process and the supervisor
//! restarts it from the persisted cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::error::SyncError;

/// Last-activity timestamp shared between the consumer and the watchdog.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    started: Instant,
    last_touch_ms: Arc<AtomicU64>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    /// A fresh heartbeat counts as touched now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_touch_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_touch_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last touch.
    pub fn idle(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_touch_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

pub struct LivenessWatchdog {
    heartbeat: Heartbeat,
    check_interval: Duration,
    timeout: Duration,
}

impl LivenessWatchdog {
    pub fn new(heartbeat: Heartbeat, check_interval: Duration, timeout: Duration) -> Self {
        Self {
            heartbeat,
            check_interval,
            timeout,
        }
    }

    pub fn check(&self) -> Result<(), SyncError> {
        let idle = self.heartbeat.idle();
        if idle > self.timeout {
            return Err(SyncError::LivenessTimeout { idle });
        }
        debug!(idle_ms = idle.as_millis() as u64, "Liveness check passed");
        Ok(())
    }

    /// Check on every interval; only returns once the timeout has been exceeded.
    pub async fn run(self) -> SyncError {
        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.check() {
                error!(
                    timeout_s = self.timeout.as_secs(),
                    error = %e,
                    "Haven't received data from the registry, giving up"
                );
                return e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let heartbeat = Heartbeat::new();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(heartbeat.idle(), Duration::from_secs(30));
        heartbeat.touch();
        assert_eq!(heartbeat.idle(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn check_fails_only_past_timeout() {
        let heartbeat = Heartbeat::new();
        let watchdog = LivenessWatchdog::new(
            heartbeat.clone(),
            Duration::from_secs(60),
            Duration::from_secs(600),
        );
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(watchdog.check().is_ok());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(
            watchdog.check(),
            Err(SyncError::LivenessTimeout { .. })
        ));
    }
}
