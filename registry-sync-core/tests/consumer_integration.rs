use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mockall::predicate::eq;
use registry_sync_core::cache::MemoryCache;
use registry_sync_core::consumer::ChangeStreamConsumer;
use registry_sync_core::contract::{
    Cache, ChangeEvent, MockChangeFeed, Origin, PackageDocument,
};
use registry_sync_core::error::{CacheError, FeedError, OriginError, SyncError};
use registry_sync_core::package_sync::PackageSynchronizer;
use registry_sync_core::store::{PackageStore, SEQ_KEY};
use registry_sync_core::watchdog::Heartbeat;
use serde_json::json;

/// Origin that answers after a per-package delay and tracks peak concurrency.
#[derive(Default)]
struct SlowOrigin {
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    fetched_at: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl SlowOrigin {
    fn with_delays(delays: &[(&str, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(name, ms)| (name.to_string(), Duration::from_millis(*ms)))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Origin for SlowOrigin {
    async fn fetch(&self, name: &str) -> Result<PackageDocument, OriginError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(name.to_string());
        self.fetched_at
            .lock()
            .unwrap()
            .insert(name.to_string(), tokio::time::Instant::now());
        let delay = self.delays.get(name).copied().unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(PackageDocument(json!({ "name": name, "versions": {} })))
    }
}

/// Cache that records every cursor write.
#[derive(Default)]
struct CursorRecorder {
    inner: MemoryCache,
    cursor_writes: Mutex<Vec<u64>>,
}

#[async_trait]
impl Cache for CursorRecorder {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        if key == SEQ_KEY {
            self.cursor_writes.lock().unwrap().push(value.parse().unwrap());
        }
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.inner.del(key).await
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), CacheError> {
        self.inner.set_add(set, member).await
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), CacheError> {
        self.inner.set_remove(set, member).await
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, CacheError> {
        self.inner.set_members(set).await
    }
}

fn finite_feed(head: u64, since: u64, events: Vec<ChangeEvent>) -> MockChangeFeed {
    let mut feed = MockChangeFeed::new();
    feed.expect_head_seq().returning(move || Ok(head));
    feed.expect_subscribe()
        .with(eq(since))
        .return_once(move |_| stream::iter(events.into_iter().map(Ok)).boxed());
    feed
}

fn consumer(
    feed: MockChangeFeed,
    origin: Arc<SlowOrigin>,
    cache: Arc<CursorRecorder>,
    concurrency: usize,
) -> ChangeStreamConsumer {
    let store = PackageStore::new(cache);
    let synchronizer = Arc::new(PackageSynchronizer::new(
        origin,
        store.clone(),
        Duration::from_millis(7500),
        Duration::from_secs(3600),
    ));
    ChangeStreamConsumer::new(
        Arc::new(feed),
        synchronizer,
        store,
        Heartbeat::new(),
        concurrency,
    )
}

#[tokio::test(start_paused = true)]
async fn cursor_advances_in_feed_order_when_work_completes_out_of_order() {
    // seq 3 finishes first, then 1, then 2.
    let origin = Arc::new(SlowOrigin::with_delays(&[("one", 200), ("two", 300), ("three", 100)]));
    let cache = Arc::new(CursorRecorder::default());
    let feed = finite_feed(
        10,
        0,
        vec![
            ChangeEvent::new(1, "one"),
            ChangeEvent::new(2, "two"),
            ChangeEvent::new(3, "three"),
        ],
    );

    let result = consumer(feed, origin, cache.clone(), 8).run().await;

    assert!(matches!(result, Err(SyncError::FeedEnded)));
    assert_eq!(*cache.cursor_writes.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn only_changes_past_the_boot_head_wait_for_the_catch_up_delay() {
    let started = tokio::time::Instant::now();
    let origin = Arc::new(SlowOrigin::default());
    let cache = Arc::new(CursorRecorder::default());
    let feed = finite_feed(
        1,
        0,
        vec![ChangeEvent::new(1, "caught-up"), ChangeEvent::new(2, "fresh")],
    );

    let _ = consumer(feed, origin.clone(), cache.clone(), 8).run().await;

    let fetched_at = origin.fetched_at.lock().unwrap();
    assert_eq!(fetched_at["caught-up"] - started, Duration::ZERO);
    assert_eq!(fetched_at["fresh"] - started, Duration::from_millis(7500));
    assert_eq!(*cache.cursor_writes.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn resumes_from_persisted_cursor() {
    let cache = Arc::new(CursorRecorder::default());
    cache.inner.set(SEQ_KEY, "41").await.unwrap();
    let feed = finite_feed(100, 41, vec![ChangeEvent::new(42, "next")]);
    let origin = Arc::new(SlowOrigin::default());

    let _ = consumer(feed, origin.clone(), cache.clone(), 8).run().await;

    assert_eq!(*origin.fetched.lock().unwrap(), vec!["next"]);
    assert_eq!(cache.inner.get(SEQ_KEY).await.unwrap().as_deref(), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn changes_without_id_are_skipped_but_acknowledged() {
    let cache = Arc::new(CursorRecorder::default());
    let feed = finite_feed(
        100,
        0,
        vec![
            ChangeEvent {
                seq: 1,
                id: None,
                deleted: false,
            },
            ChangeEvent::new(2, "real"),
        ],
    );
    let origin = Arc::new(SlowOrigin::default());

    let _ = consumer(feed, origin.clone(), cache.clone(), 8).run().await;

    assert_eq!(*origin.fetched.lock().unwrap(), vec!["real"]);
    assert_eq!(*cache.cursor_writes.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn in_flight_synchronisations_respect_the_concurrency_bound() {
    let events: Vec<ChangeEvent> = (1..=20)
        .map(|seq| ChangeEvent::new(seq, format!("pkg-{seq}")))
        .collect();
    let feed = finite_feed(100, 0, events);
    let origin = Arc::new(SlowOrigin::default());
    let cache = Arc::new(CursorRecorder::default());

    let _ = consumer(feed, origin.clone(), cache.clone(), 3).run().await;

    assert_eq!(origin.fetched.lock().unwrap().len(), 20);
    assert!(origin.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(cache.cursor_writes.lock().unwrap().last(), Some(&20));
}

#[tokio::test(start_paused = true)]
async fn subscription_error_is_fatal() {
    let mut feed = MockChangeFeed::new();
    feed.expect_head_seq().returning(|| Ok(0));
    feed.expect_subscribe().return_once(|_| {
        stream::iter(vec![Err(FeedError::Status {
            status: 400,
            body: "bad since".into(),
        })])
        .boxed()
    });

    let result = consumer(
        feed,
        Arc::new(SlowOrigin::default()),
        Arc::new(CursorRecorder::default()),
        8,
    )
    .run()
    .await;

    assert!(matches!(result, Err(SyncError::Feed(FeedError::Status { status: 400, .. }))));
}
