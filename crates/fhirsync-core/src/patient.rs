//! Internal Patient entity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::ExternalResourceRef;

/// Administrative gender, restricted to the FHIR value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Male
    Male,
    /// Female
    Female,
    /// Other
    Other,
    /// Unknown
    Unknown,
}

impl Gender {
    /// Parse a wire-level gender code. Returns `None` for values outside the
    /// FHIR administrative-gender value set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }
}

/// A single human name entry, normalized from the FHIR `name[]` structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanName {
    /// Family name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    /// Given names, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,

    /// Full text representation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Internal Patient entity.
///
/// A Patient may exist purely locally (`external_ref` is `None`) or be linked
/// to exactly one external source record. At most one local Patient exists per
/// distinct external reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    /// Local identifier
    pub id: Uuid,

    /// Identity of the originating external resource, if synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalResourceRef>,

    /// Patient names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,

    /// Administrative gender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,

    /// Date of birth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,

    /// Source-provided last-updated marker of the synced version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_marker: Option<DateTime<Utc>>,
}

impl Patient {
    /// Create a new purely local patient with a fresh identifier.
    pub fn new_local() -> Self {
        Self {
            id: Uuid::new_v4(),
            external_ref: None,
            name: Vec::new(),
            gender: None,
            birth_date: None,
            version_marker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parse() {
        assert_eq!(Gender::parse("female"), Some(Gender::Female));
        assert_eq!(Gender::parse("F"), None);
    }

    #[test]
    fn test_local_patient_has_no_ref() {
        let p = Patient::new_local();
        assert!(p.external_ref.is_none());
        assert!(p.version_marker.is_none());
    }
}
