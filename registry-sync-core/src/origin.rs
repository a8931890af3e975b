//! HTTP client for the registry document endpoint.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::contract::{Origin, PackageDocument};
use crate::error::OriginError;

/// Characters left alone by JavaScript's `encodeURIComponent`, which is what
/// registry clients use when building package URLs.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Escape a package name for use as a single URL path segment.
///
/// Scoped names keep their leading `@` and have the separating slash encoded,
/// so `@types/node` becomes `@types%2fnode`.
pub fn escape_package_name(name: &str) -> String {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, pkg)) => format!(
            "@{}%2f{}",
            utf8_percent_encode(scope, COMPONENT),
            utf8_percent_encode(pkg, COMPONENT)
        ),
        None => utf8_percent_encode(name, COMPONENT).to_string(),
    }
}

pub struct RegistryClient {
    http: Client,
    base_url: String,
    retry_delay: Duration,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, retry_delay: Duration) -> Self {
        Self::with_http_client(Client::new(), base_url, retry_delay)
    }

    pub fn with_http_client(http: Client, base_url: impl Into<String>, retry_delay: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            retry_delay,
        }
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, escape_package_name(name))
    }
}

#[async_trait]
impl Origin for RegistryClient {
    async fn fetch(&self, name: &str) -> Result<PackageDocument, OriginError> {
        let url = self.package_url(name);

        // 503 is retried forever; the liveness watchdog bounds the overall stall.
        loop {
            debug!(package = %name, url = %url, "Fetching package document");
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| OriginError::fetch_failed(name, None, e.to_string()))?;

            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(
                    package = %name,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "503 registry response, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(OriginError::NotFound {
                    name: name.to_string(),
                });
            }
            if !(status.is_success() || status.is_redirection()) {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
                return Err(OriginError::fetch_failed(name, Some(status.as_u16()), body));
            }

            return response
                .json::<serde_json::Value>()
                .await
                .map(PackageDocument)
                .map_err(|e| {
                    OriginError::fetch_failed(
                        name,
                        Some(status.as_u16()),
                        format!("invalid JSON body: {e}"),
                    )
                });
        }
    }
}
