//! # contract: seams between the pipeline and the outside world
//!
//! The mirror talks to three external collaborators, each behind a trait so
//! that production adapters and test mocks are interchangeable:
//!
//! - [`Origin`]: the registry document endpoint (one JSON document per package).
//! - [`ChangeFeed`]: the ordered, resumable change feed.
//! - [`Cache`]: the key-value store holding the cursor, slim records and the stale set.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; the generated `Mock*` types are
//!   exported under the `test-export-mocks` feature so integration tests and
//!   downstream crates can use them.
//!
//! ## Concrete implementations
//! - [`crate::origin::RegistryClient`], [`crate::feed::CouchChangeFeed`]
//! - [`crate::cache::MemoryCache`], [`crate::cache::FsCache`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{CacheError, FeedError, OriginError};

/// A full registry document, kept as untyped JSON. Only the projector and the
/// staleness check look inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageDocument(pub serde_json::Value);

impl PackageDocument {
    /// `time.modified`, if present and a valid RFC 3339 timestamp.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.get("time")?.get("modified")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl From<serde_json::Value> for PackageDocument {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// One entry of the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub seq: u64,
    /// Package name. `None` when the feed entry carried no usable id.
    pub id: Option<String>,
    pub deleted: bool,
}

impl ChangeEvent {
    pub fn new(seq: u64, id: impl Into<String>) -> Self {
        Self {
            seq,
            id: Some(id.into()),
            deleted: false,
        }
    }
}

/// The registry document endpoint.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetch the full document for `name`.
    ///
    /// Transient unavailability is retried inside the implementation; callers
    /// only ever see [`OriginError::NotFound`] or [`OriginError::FetchFailed`].
    async fn fetch(&self, name: &str) -> Result<PackageDocument, OriginError>;
}

/// The ordered, resumable change feed.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Current head sequence of the feed.
    async fn head_seq(&self) -> Result<u64, FeedError>;

    /// Subscribe to every change after `since`, in feed order. An `Err` item
    /// is unrecoverable and the stream should be considered finished.
    fn subscribe(&self, since: u64) -> BoxStream<'static, Result<ChangeEvent, FeedError>>;
}

/// Key-value store with named sets. Single-key atomicity is all that is required.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removing a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    async fn set_add(&self, set: &str, member: &str) -> Result<(), CacheError>;

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), CacheError>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>, CacheError>;
}
