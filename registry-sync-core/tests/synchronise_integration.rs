use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use registry_sync_core::cache::MemoryCache;
use registry_sync_core::config::SyncConfig;
use registry_sync_core::contract::{ChangeEvent, MockChangeFeed, MockOrigin, PackageDocument};
use registry_sync_core::error::{FeedError, SyncError};
use registry_sync_core::store::PackageStore;
use registry_sync_core::synchronise::synchronise;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn silent_feed_trips_the_liveness_watchdog() {
    let mut feed = MockChangeFeed::new();
    feed.expect_head_seq().returning(|| Ok(0));
    feed.expect_subscribe()
        .return_once(|_| stream::pending().boxed());
    let origin = MockOrigin::new();

    let started = tokio::time::Instant::now();
    let result = synchronise(
        &SyncConfig::default(),
        Arc::new(origin),
        Arc::new(feed),
        Arc::new(MemoryCache::new()),
    )
    .await;

    assert!(matches!(result, Err(SyncError::LivenessTimeout { .. })));
    // Checked every minute, fatal once idle for more than ten.
    assert_eq!(started.elapsed(), Duration::from_secs(11 * 60));
}

#[tokio::test(start_paused = true)]
async fn steady_changes_keep_the_watchdog_quiet() {
    let mut feed = MockChangeFeed::new();
    feed.expect_head_seq().returning(|| Ok(1_000));
    // One change every five minutes for an hour, then silence.
    feed.expect_subscribe().return_once(|_| {
        stream::iter(1..=12u64)
            .then(|seq| async move {
                tokio::time::sleep(Duration::from_secs(5 * 60)).await;
                Ok::<_, FeedError>(ChangeEvent::new(seq, format!("pkg-{seq}")))
            })
            .chain(stream::pending())
            .boxed()
    });
    let mut origin = MockOrigin::new();
    origin
        .expect_fetch()
        .returning(|name| Ok(PackageDocument(json!({ "name": name }))));
    let cache = Arc::new(MemoryCache::new());

    let started = tokio::time::Instant::now();
    let result = synchronise(
        &SyncConfig::default(),
        Arc::new(origin),
        Arc::new(feed),
        cache.clone(),
    )
    .await;

    assert!(matches!(result, Err(SyncError::LivenessTimeout { .. })));
    assert!(started.elapsed() > Duration::from_secs(60 * 60));
    let store = PackageStore::new(cache);
    assert_eq!(store.cursor().await.unwrap(), 12);
    assert!(store.package("pkg-12").await.unwrap().is_some());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_touching_the_feed() {
    let mut feed = MockChangeFeed::new();
    feed.expect_head_seq().never();
    let config = SyncConfig {
        concurrency: 0,
        ..SyncConfig::default()
    };

    let result = synchronise(
        &config,
        Arc::new(MockOrigin::new()),
        Arc::new(feed),
        Arc::new(MemoryCache::new()),
    )
    .await;

    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}
