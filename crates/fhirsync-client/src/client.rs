//! Paginated FHIR source client.

use chrono::{DateTime, SecondsFormat, Utc};
use fhirsync_core::ResourceType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ClientError, ClientResult, RawResource, SourceTransport};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the FHIR source, e.g. `https://fhir.example.org/fhir`
    pub base_url: String,

    /// Requested page size (`_count`)
    pub page_size: u32,

    /// Attempts per page, including the first
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts
    pub backoff_base: Duration,

    /// Bound on any single page fetch
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with default pagination and retry settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            page_size: 50,
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// URL of the first page for one resource type, with the incremental
    /// filter when `since` is set. Fixture sources register bundles under
    /// the same keys.
    pub fn first_page_url(
        &self,
        resource_type: ResourceType,
        since: Option<DateTime<Utc>>,
    ) -> String {
        let base = self.base_url.trim_end_matches('/');
        let mut url = format!("{}/{}?_count={}", base, resource_type, self.page_size);
        if let Some(since) = since {
            url.push_str(&format!(
                "&_lastUpdated=gt{}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        url
    }
}

/// Read client for one external FHIR source.
#[derive(Clone)]
pub struct FhirClient {
    transport: Arc<dyn SourceTransport>,
    config: ClientConfig,
}

impl FhirClient {
    /// Build a client over the given transport.
    pub fn new(transport: Arc<dyn SourceTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// The source endpoint this client reads from.
    pub fn endpoint(&self) -> &str {
        &self.config.base_url
    }

    /// Start a lazy paginated fetch of one resource type.
    ///
    /// The returned cursor is finite and not restartable; a fresh call
    /// re-initiates pagination from the start, or from `since` for an
    /// incremental sync.
    pub fn fetch_resources(
        &self,
        resource_type: ResourceType,
        since: Option<DateTime<Utc>>,
    ) -> ResourcePages {
        ResourcePages {
            client: self.clone(),
            next_url: Some(self.config.first_page_url(resource_type, since)),
        }
    }

    /// Fetch one page with bounded retry and exponential backoff.
    async fn fetch_page_with_retry(&self, url: &str) -> ClientResult<crate::RawBundle> {
        let mut last = None;
        for attempt in 1..=self.config.max_attempts {
            let fetch = self.transport.fetch_page(url);
            let outcome = match tokio::time::timeout(self.config.request_timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout {
                    url: url.to_string(),
                }),
            };

            match outcome {
                Ok(bundle) => return Ok(bundle),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                    warn!(url, attempt, error = %e, "transient fetch failure, backing off");
                    tokio::time::sleep(delay).await;
                    last = Some(e);
                }
                Err(e) if e.is_transient() => {
                    return Err(ClientError::Exhausted {
                        url: url.to_string(),
                        attempts: self.config.max_attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        // max_attempts >= 1, so the loop returns before falling through
        Err(ClientError::Exhausted {
            url: url.to_string(),
            attempts: self.config.max_attempts,
            last: Box::new(last.unwrap_or(ClientError::Timeout {
                url: url.to_string(),
            })),
        })
    }
}

/// Lazy page cursor over one resource type.
///
/// Yields the resources of one page per call until the source stops providing
/// a `next` link. An error ends iteration; pages already yielded stand.
pub struct ResourcePages {
    client: FhirClient,
    next_url: Option<String>,
}

impl ResourcePages {
    /// Fetch the next page of resources. Returns `Ok(None)` once pagination
    /// is complete.
    pub async fn next_page(&mut self) -> ClientResult<Option<Vec<RawResource>>> {
        let url = match self.next_url.take() {
            Some(url) => url,
            None => return Ok(None),
        };

        let bundle = match self.client.fetch_page_with_retry(&url).await {
            Ok(bundle) => bundle,
            Err(e) => {
                // not restartable: a failed page ends this cursor
                self.next_url = None;
                return Err(e);
            }
        };

        self.next_url = bundle.next_link().map(str::to_string);
        let resources = bundle.into_resources();
        debug!(
            url,
            count = resources.len(),
            has_next = self.next_url.is_some(),
            "fetched page"
        );
        Ok(Some(resources))
    }
}
