//! CodeableConcept catalog entries and their normalized wire form.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A catalog entry for a coded clinical term.
///
/// The `(system, code)` pair is unique in the catalog and immutable; only the
/// display text may be refreshed without changing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    /// Local identifier
    pub id: Uuid,

    /// Coding-scheme URI, e.g. `http://loinc.org`
    pub system: String,

    /// Code within the coding scheme
    pub code: String,

    /// Human-readable display text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl CodeableConcept {
    /// Create a new catalog entry with a fresh identifier.
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            system: system.into(),
            code: code.into(),
            display,
        }
    }

    /// The identity key of this entry.
    pub fn key(&self) -> (String, String) {
        (self.system.clone(), self.code.clone())
    }
}

/// A normalized `(system, code, display)` triple extracted from a raw resource.
///
/// Equality and hashing consider only `(system, code)` so that exact repeats
/// within one resource deduplicate regardless of display text.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ConceptTriple {
    /// Coding-scheme URI
    pub system: String,

    /// Code within the coding scheme
    pub code: String,

    /// Display text, if provided by the source
    pub display: Option<String>,
}

impl ConceptTriple {
    /// Create a triple.
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: Option<String>,
    ) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display,
        }
    }

    /// The identity key of this triple.
    pub fn key(&self) -> (String, String) {
        (self.system.clone(), self.code.clone())
    }
}

impl PartialEq for ConceptTriple {
    fn eq(&self, other: &Self) -> bool {
        self.system == other.system && self.code == other.code
    }
}

impl Hash for ConceptTriple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system.hash(state);
        self.code.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_triple_identity_ignores_display() {
        let a = ConceptTriple::new("http://loinc.org", "718-7", Some("Hemoglobin".into()));
        let b = ConceptTriple::new("http://loinc.org", "718-7", None);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_concept_key() {
        let c = CodeableConcept::new("http://loinc.org", "2339-0", Some("Blood Glucose".into()));
        assert_eq!(c.key(), ("http://loinc.org".into(), "2339-0".into()));
    }
}
