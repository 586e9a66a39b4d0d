//! Error types for FHIR source client operations.

use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Error types that can occur while fetching from a FHIR source.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Underlying HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The source answered with a transient status (5xx or 429)
    #[error("transient source status {status} for {url}")]
    TransientStatus {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The source rejected the request with a non-transient 4xx status
    #[error("source rejected {url} with status {status}")]
    SourceRejected {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The response body was not a parseable Bundle
    #[error("invalid bundle from {url}: {source}")]
    InvalidBundle {
        /// Requested URL
        url: String,
        /// Decode failure
        source: serde_json::Error,
    },

    /// The page fetch exceeded the request timeout
    #[error("timed out fetching {url}")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// All retry attempts for one page were exhausted
    #[error("exhausted {attempts} attempts fetching {url}: {last}")]
    Exhausted {
        /// Requested URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// The final attempt's error
        last: Box<ClientError>,
    },

    /// No bundle is registered for the URL (fixture transport only)
    #[error("no fixture registered for {url}")]
    MissingFixture {
        /// Requested URL
        url: String,
    },
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::TransientStatus { .. } | ClientError::Timeout { .. } => true,
            ClientError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Create an invalid-bundle error.
    pub fn invalid_bundle(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidBundle {
            url: url.into(),
            source,
        }
    }
}
