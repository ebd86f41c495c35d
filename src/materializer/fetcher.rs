//! HTTP artifact fetcher

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use url::Url;

use super::{ArtifactFetcher, ArtifactRequest};
use crate::config::{OutputConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;

/// Header carrying the anti-forgery token of the active session
pub const ANTI_FORGERY_HEADER: &str = "X-CSRF-Token";

/// Fetches finished artifacts from the conversion service over HTTP
///
/// Requests are `GET {endpoint}?token=..&format=..` with the anti-forgery
/// token in [`ANTI_FORGERY_HEADER`]. Timeouts, connection failures and 5xx
/// responses are retried per [`RetryConfig`]; 429 and 503 honor the
/// server's `Retry-After`. Anything else fails at once.
#[derive(Clone, Debug)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl HttpArtifactFetcher {
    /// Build a fetcher for the configured artifact endpoint
    pub fn new(output: &OutputConfig, retry: RetryConfig) -> Result<Self> {
        let endpoint = Url::parse(&output.artifact_endpoint).map_err(|e| Error::Config {
            message: format!(
                "'{}' is not a valid artifact endpoint: {}",
                output.artifact_endpoint, e
            ),
            key: Some("output.artifact_endpoint".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(output.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    fn request_url(&self, request: &ArtifactRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", &request.token)
            .append_pair("format", &request.format);
        url
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, request: &ArtifactRequest) -> Result<Vec<u8>> {
        let url = self.request_url(request);
        tracing::debug!(format = %request.format, url = %url, "Fetching artifact");

        with_retry(&self.retry, &request.format, || {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(url)
                    .header(ANTI_FORGERY_HEADER, &request.anti_forgery_token)
                    .send()
                    .await?;

                let status = response.status();
                if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(Error::ServiceBusy {
                        status: status.as_u16(),
                        retry_after: retry_after(response.headers()),
                    });
                }

                let body = response.error_for_status()?.bytes().await?;
                Ok::<_, Error>(body.to_vec())
            }
        })
        .await
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
