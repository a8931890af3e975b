//! Error types for the mirror pipeline.
//!
//! Per-package failures ([`OriginError`]) are absorbed by the synchronizer and
//! routed to the stale set. Only [`SyncError`] ever stops the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failure fetching a single package document from the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    /// The registry definitively reports that the package does not exist.
    #[error("package {name} not found in registry")]
    NotFound { name: String },

    /// Any other failure. The package should be retried later.
    #[error("fetching {name} failed (status {status:?}): {message}")]
    FetchFailed {
        name: String,
        status: Option<u16>,
        message: String,
    },
}

impl OriginError {
    pub fn fetch_failed(name: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::FetchFailed {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure talking to the upstream change feed.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("change feed request failed: {0}")]
    Transport(String),

    #[error("change feed returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode change feed response: {0}")]
    Decode(String),
}

/// Failure reading or writing the cache store.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("error while {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache value under {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action: action.into(),
            source,
        }
    }
}

/// Fatal conditions. Any of these ends [`crate::synchronise::synchronise`] and
/// the process is expected to be restarted by its supervisor.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("change feed subscription ended unexpectedly")]
    FeedEnded,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("no change received from the registry for {idle:?}")]
    LivenessTimeout { idle: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
