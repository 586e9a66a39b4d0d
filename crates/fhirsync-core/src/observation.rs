//! Internal Observation entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::ExternalResourceRef;

/// Clinical status of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    /// The observation is complete
    Final,
    /// An early result, subject to change
    Preliminary,
    /// The result has been corrected after being final
    Amended,
}

impl ObservationStatus {
    /// Parse a wire-level status code. Returns `None` for statuses the engine
    /// does not accept.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "final" => Some(ObservationStatus::Final),
            "preliminary" => Some(ObservationStatus::Preliminary),
            "amended" => Some(ObservationStatus::Amended),
            _ => None,
        }
    }
}

/// A measured quantity with an optional unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Numeric value
    pub value: f64,

    /// Unit of measure, e.g. `mm[Hg]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Internal Observation entity.
///
/// Every observation belongs to an existing Patient and references a catalog
/// CodeableConcept by id. Once reconciled it is immutable except for
/// value/timestamp corrections sourced from a newer external version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Local identifier
    pub id: Uuid,

    /// Owning patient (required)
    pub patient_id: Uuid,

    /// Primary code, as a catalog concept id
    pub code_id: Uuid,

    /// Clinical status
    pub status: ObservationStatus,

    /// Measured value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Quantity>,

    /// Start of the clinically effective window
    pub effective_start: DateTime<Utc>,

    /// End of the clinically effective window
    pub effective_end: DateTime<Utc>,

    /// When the result was released by the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,

    /// Identity of the originating external resource, if synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalResourceRef>,

    /// Source-provided last-updated marker of the synced version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_marker: Option<DateTime<Utc>>,
}
