//! Stable identity linking local records to their originating external resource.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// FHIR resource types handled by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// FHIR Patient resource
    Patient,
    /// FHIR Observation resource
    Observation,
}

impl ResourceType {
    /// The resource type name as it appears on the FHIR wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Observation => "Observation",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a resource type name is not handled by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown resource type: {0}")]
pub struct ParseResourceTypeError(pub String);

impl FromStr for ResourceType {
    type Err = ParseResourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" | "patient" => Ok(ResourceType::Patient),
            "Observation" | "observation" => Ok(ResourceType::Observation),
            other => Err(ParseResourceTypeError(other.to_string())),
        }
    }
}

/// Identity of a source resource: `(resourceType, externalId, sourceEndpoint)`.
///
/// Stable across runs and used as the natural key for idempotent matching.
/// Never mutated once attached to a local record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalResourceRef {
    /// Type of the source resource
    pub resource_type: ResourceType,

    /// Identifier of the resource on the source server
    pub external_id: String,

    /// Base URL of the source server the resource came from
    pub source_endpoint: String,
}

impl ExternalResourceRef {
    /// Create a reference for a resource on the given source endpoint.
    pub fn new(
        resource_type: ResourceType,
        external_id: impl Into<String>,
        source_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            external_id: external_id.into(),
            source_endpoint: source_endpoint.into(),
        }
    }
}

impl fmt::Display for ExternalResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.resource_type, self.external_id, self.source_endpoint
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_round_trip() {
        assert_eq!("Patient".parse::<ResourceType>(), Ok(ResourceType::Patient));
        assert_eq!(
            "observation".parse::<ResourceType>(),
            Ok(ResourceType::Observation)
        );
        assert!("Encounter".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_ref_display() {
        let r = ExternalResourceRef::new(
            ResourceType::Patient,
            "p-1",
            "https://fhir.example.org",
        );
        assert_eq!(r.to_string(), "Patient/p-1@https://fhir.example.org");
    }

    #[test]
    fn test_ref_identity() {
        let a = ExternalResourceRef::new(ResourceType::Patient, "p-1", "https://a");
        let b = ExternalResourceRef::new(ResourceType::Patient, "p-1", "https://b");
        assert_ne!(a, b, "same id on different endpoints is a different record");
    }
}
