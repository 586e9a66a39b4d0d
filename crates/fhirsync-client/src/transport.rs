//! Transport abstraction for fetching bundle pages.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::{ClientError, ClientResult, RawBundle};

/// Fetches one bundle page from a source URL.
///
/// Implementations perform a single request; retry, backoff and pagination
/// belong to [`FhirClient`](crate::FhirClient).
#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Fetch the bundle at `url`.
    async fn fetch_page(&self, url: &str) -> ClientResult<RawBundle>;
}

/// HTTP transport over a reqwest client.
pub struct HttpTransport {
    http: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    /// Build a transport with the given per-request timeout and optional
    /// bearer token.
    pub fn new(request_timeout: Duration, token: Option<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http, token })
    }
}

#[async_trait]
impl SourceTransport for HttpTransport {
    async fn fetch_page(&self, url: &str) -> ClientResult<RawBundle> {
        debug!(url, "fetching bundle page");
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout { url: url.to_string() }
            } else {
                ClientError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::TransientStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::SourceRejected {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::invalid_bundle(url, e))
    }
}

/// A fault queued on a fixture URL before its bundle is served.
#[derive(Debug, Clone, Copy)]
pub enum InjectedFault {
    /// A retryable condition (served as a 503)
    Transient,
    /// A non-retryable rejection with the given 4xx status
    Rejected(u16),
}

/// In-memory transport serving bundles registered per URL.
///
/// Stands in for a live source in tests and offline runs. Faults queued on a
/// URL are served before its bundle, which makes retry behavior testable.
#[derive(Default)]
pub struct FixtureTransport {
    pages: Mutex<HashMap<String, RawBundle>>,
    faults: Mutex<HashMap<String, VecDeque<InjectedFault>>>,
}

impl FixtureTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bundle served for `url`.
    pub fn register(&self, url: impl Into<String>, bundle: RawBundle) {
        self.pages.lock().unwrap().insert(url.into(), bundle);
    }

    /// Queue a fault served on the next fetch of `url`, before its bundle.
    pub fn inject_fault(&self, url: impl Into<String>, fault: InjectedFault) {
        self.faults
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(fault);
    }
}

#[async_trait]
impl SourceTransport for FixtureTransport {
    async fn fetch_page(&self, url: &str) -> ClientResult<RawBundle> {
        if let Some(fault) = self
            .faults
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            return Err(match fault {
                InjectedFault::Transient => ClientError::TransientStatus {
                    status: 503,
                    url: url.to_string(),
                },
                InjectedFault::Rejected(status) => ClientError::SourceRejected {
                    status,
                    url: url.to_string(),
                },
            });
        }

        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ClientError::MissingFixture {
                url: url.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_serves_registered_bundle() {
        let transport = FixtureTransport::new();
        transport.register("https://s/Patient", RawBundle::default());
        assert!(transport.fetch_page("https://s/Patient").await.is_ok());
        assert!(matches!(
            transport.fetch_page("https://s/Observation").await,
            Err(ClientError::MissingFixture { .. })
        ));
    }

    #[tokio::test]
    async fn test_fixture_faults_drain_in_order() {
        let transport = FixtureTransport::new();
        transport.register("https://s/Patient", RawBundle::default());
        transport.inject_fault("https://s/Patient", InjectedFault::Transient);

        let first = transport.fetch_page("https://s/Patient").await;
        assert!(matches!(first, Err(ClientError::TransientStatus { .. })));
        assert!(transport.fetch_page("https://s/Patient").await.is_ok());
    }
}
