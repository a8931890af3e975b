//! HTTP client for a CouchDB-style `_changes` feed.
//!
//! The subscription is a long-poll loop exposed as a stream. Transport errors
//! and 5xx responses are retried after the configured delay; anything else
//! ends the stream with an error.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::contract::{ChangeEvent, ChangeFeed};
use crate::error::FeedError;

/// CouchDB sequences are either plain numbers or strings such as `"42-g1AAAA"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireSeq {
    Number(u64),
    Text(String),
}

impl WireSeq {
    fn position(&self) -> Result<u64, FeedError> {
        match self {
            WireSeq::Number(n) => Ok(*n),
            WireSeq::Text(s) => s
                .split('-')
                .next()
                .and_then(|prefix| prefix.parse().ok())
                .ok_or_else(|| FeedError::Decode(format!("unrecognised sequence {s:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChange {
    seq: WireSeq,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ChangesPage {
    #[serde(default)]
    results: Vec<WireChange>,
    last_seq: Option<WireSeq>,
}

pub struct CouchChangeFeed {
    http: Client,
    changes_url: String,
    batch_size: usize,
    poll_timeout: Duration,
    retry_delay: Duration,
}

impl CouchChangeFeed {
    pub fn new(http: Client, config: &SyncConfig) -> Self {
        Self {
            http,
            changes_url: config.changes_url.clone(),
            batch_size: config.feed_batch_size,
            poll_timeout: config.feed_poll_timeout,
            retry_delay: config.retry_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(Client::new(), config)
    }
}

#[async_trait]
impl ChangeFeed for CouchChangeFeed {
    async fn head_seq(&self) -> Result<u64, FeedError> {
        let response = self
            .http
            .get(&self.changes_url)
            .query(&[("descending", "true"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let page = decode_page(response).await?;
        let head = page.last_seq.map(|s| s.position()).transpose()?.unwrap_or(0);
        debug!(head, "Fetched change feed head");
        Ok(head)
    }

    fn subscribe(&self, since: u64) -> BoxStream<'static, Result<ChangeEvent, FeedError>> {
        let poller = Poller {
            http: self.http.clone(),
            changes_url: self.changes_url.clone(),
            batch_size: self.batch_size,
            poll_timeout: self.poll_timeout,
            retry_delay: self.retry_delay,
            since,
            buffer: VecDeque::new(),
            failed: false,
        };

        stream::unfold(poller, |mut poller| async move {
            if poller.failed {
                return None;
            }
            loop {
                if let Some(event) = poller.buffer.pop_front() {
                    return Some((Ok(event), poller));
                }
                if let Err(e) = poller.poll_once().await {
                    poller.failed = true;
                    return Some((Err(e), poller));
                }
            }
        })
        .boxed()
    }
}

struct Poller {
    http: Client,
    changes_url: String,
    batch_size: usize,
    poll_timeout: Duration,
    retry_delay: Duration,
    since: u64,
    buffer: VecDeque<ChangeEvent>,
    failed: bool,
}

impl Poller {
    /// One long-poll round trip. Transient failures sleep and return `Ok` with
    /// an empty buffer so the caller simply polls again.
    async fn poll_once(&mut self) -> Result<(), FeedError> {
        let query = [
            ("feed", "longpoll".to_string()),
            ("since", self.since.to_string()),
            ("limit", self.batch_size.to_string()),
            ("timeout", self.poll_timeout.as_millis().to_string()),
        ];
        let sent = self
            .http
            .get(&self.changes_url)
            .query(&query)
            .timeout(self.poll_timeout + Duration::from_secs(10))
            .send()
            .await;

        let response = match sent {
            Ok(r) if r.status().is_server_error() => {
                warn!(status = %r.status(), since = self.since, "Change feed unavailable, retrying");
                tokio::time::sleep(self.retry_delay).await;
                return Ok(());
            }
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, since = self.since, "Change feed request failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
                return Ok(());
            }
        };

        let page = decode_page(response).await?;
        let mut highest = self.since;
        for change in page.results {
            let seq = change.seq.position()?;
            highest = highest.max(seq);
            self.buffer.push_back(ChangeEvent {
                seq,
                id: change.id.filter(|id| !id.is_empty()),
                deleted: change.deleted,
            });
        }
        if let Some(last) = page.last_seq {
            highest = highest.max(last.position()?);
        }
        debug!(
            since = self.since,
            next = highest,
            received = self.buffer.len(),
            "Polled change feed"
        );
        self.since = highest;
        Ok(())
    }
}

async fn decode_page(response: reqwest::Response) -> Result<ChangesPage, FeedError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
        return Err(FeedError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<ChangesPage>()
        .await
        .map_err(|e| FeedError::Decode(e.to_string()))
}
