//! Typed access to the cache: cursor, slim records and the stale set.
//!
//! Every mutation here is a single-key overwrite or a single set add/remove,
//! so concurrent writers need no coordination beyond the backend's own.

use std::sync::Arc;

use tracing::warn;

use crate::contract::Cache;
use crate::error::CacheError;
use crate::projector::SlimPackage;

pub const SEQ_KEY: &str = "seq";
pub const PKG_KEY_PREFIX: &str = "p/";
pub const STALE_SET_KEY: &str = "srq";

#[derive(Clone)]
pub struct PackageStore {
    cache: Arc<dyn Cache>,
}

impl PackageStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Last acknowledged feed position; 0 when unset or unreadable.
    pub async fn cursor(&self) -> Result<u64, CacheError> {
        let raw = self.cache.get(SEQ_KEY).await?;
        Ok(match raw {
            None => 0,
            Some(value) => value.trim().parse().unwrap_or_else(|e| {
                warn!(value = %value, error = %e, "Ignoring unparsable cursor, replaying from 0");
                0
            }),
        })
    }

    pub async fn set_cursor(&self, seq: u64) -> Result<(), CacheError> {
        self.cache.set(SEQ_KEY, &seq.to_string()).await
    }

    pub async fn package(&self, name: &str) -> Result<Option<SlimPackage>, CacheError> {
        let key = package_key(name);
        match self.cache.get(&key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Corrupt {
                    key,
                    message: e.to_string(),
                }),
        }
    }

    pub async fn put_package(&self, name: &str, package: &SlimPackage) -> Result<(), CacheError> {
        let json = serde_json::to_string(package)?;
        self.cache.set(&package_key(name), &json).await
    }

    pub async fn delete_package(&self, name: &str) -> Result<(), CacheError> {
        self.cache.del(&package_key(name)).await
    }

    pub async fn enqueue_stale(&self, name: &str) -> Result<(), CacheError> {
        self.cache.set_add(STALE_SET_KEY, name).await
    }

    pub async fn dequeue_stale(&self, name: &str) -> Result<(), CacheError> {
        self.cache.set_remove(STALE_SET_KEY, name).await
    }

    pub async fn stale_packages(&self) -> Result<Vec<String>, CacheError> {
        self.cache.set_members(STALE_SET_KEY).await
    }
}

pub fn package_key(name: &str) -> String {
    format!("{PKG_KEY_PREFIX}{name}")
}
