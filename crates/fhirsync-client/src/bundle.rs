//! Raw FHIR Bundle wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A paginated FHIR Bundle page as received from the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBundle {
    /// Always `"Bundle"` on the wire
    #[serde(default)]
    pub resource_type: String,

    /// Total matches across all pages, when the source reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Pagination links
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<RawLink>,

    /// Resource entries on this page
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<RawEntry>,
}

impl RawBundle {
    /// URL of the next page, when present.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    /// Consume the bundle into its raw resources, skipping empty entries.
    pub fn into_resources(self) -> Vec<RawResource> {
        self.entry
            .into_iter()
            .filter_map(|e| e.resource)
            .map(RawResource::new)
            .collect()
    }
}

/// A bundle pagination link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLink {
    /// Link relation, e.g. `self` or `next`
    pub relation: String,

    /// Link target
    pub url: String,
}

/// One bundle entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Absolute URL of the resource, when the source provides it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    /// The resource payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

/// An unvalidated resource payload from a bundle entry.
///
/// Keeps the open-ended wire shape as JSON; the mapper is responsible for
/// validating it into the internal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResource(Value);

impl RawResource {
    /// Wrap a raw payload.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The full payload.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// The `resourceType` field, when present and a string.
    pub fn resource_type(&self) -> Option<&str> {
        self.0.get("resourceType").and_then(Value::as_str)
    }

    /// The `id` field, when present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// A top-level field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_next_link() {
        let bundle: RawBundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "link": [
                {"relation": "self", "url": "https://s/Patient?page=1"},
                {"relation": "next", "url": "https://s/Patient?page=2"}
            ],
            "entry": []
        }))
        .unwrap();
        assert_eq!(bundle.next_link(), Some("https://s/Patient?page=2"));
    }

    #[test]
    fn test_last_page_has_no_next_link() {
        let bundle: RawBundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "link": [{"relation": "self", "url": "https://s/Patient?page=2"}]
        }))
        .unwrap();
        assert!(bundle.next_link().is_none());
    }

    #[test]
    fn test_into_resources_skips_empty_entries() {
        let bundle: RawBundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p-1"}},
                {"fullUrl": "https://s/Patient/p-2"}
            ]
        }))
        .unwrap();
        let resources = bundle.into_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id(), Some("p-1"));
        assert_eq!(resources[0].resource_type(), Some("Patient"));
    }
}
