//! Error types for store operations.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error types that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No patient with the given local id
    #[error("patient not found: {0}")]
    PatientNotFound(Uuid),

    /// No observation with the given local id
    #[error("observation not found: {0}")]
    ObservationNotFound(Uuid),

    /// No concept with the given local id
    #[error("concept not found: {0}")]
    ConceptNotFound(Uuid),

    /// An observation write referenced a patient that is not persisted
    #[error("unknown patient referenced by observation: {0}")]
    UnknownPatient(Uuid),

    /// A concept with the same `(system, code)` pair already exists
    #[error("duplicate concept: ({system}, {code})")]
    DuplicateConcept {
        /// Coding-scheme URI
        system: String,
        /// Code within the scheme
        code: String,
    },

    /// A record with the same external reference already exists
    #[error("duplicate external reference: {0}")]
    DuplicateExternalRef(String),

    /// The concept is referenced by at least one observation
    #[error("concept {0} is referenced by observations and cannot be deleted")]
    ConceptInUse(Uuid),

    /// The backing service rejected the request
    #[error("store rejected request ({status}): {detail}")]
    Rejected {
        /// HTTP status code from the backing service
        status: u16,
        /// Response detail
        detail: String,
    },

    /// Transport failure talking to the backing service
    #[cfg(feature = "rest")]
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Payload from the backing service could not be decoded
    #[error("store payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a duplicate-concept error.
    pub fn duplicate_concept(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self::DuplicateConcept {
            system: system.into(),
            code: code.into(),
        }
    }

    /// Create a rejected-request error.
    pub fn rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }
}
