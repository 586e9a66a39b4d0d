//! Validation and transformation of raw resources into the internal model.
//!
//! Side-effect free: no I/O, no persistence. Each raw resource maps to a
//! [`MappedRecord`] or a per-record [`MappingError`] that is recorded and
//! skipped without affecting the rest of the run.

use chrono::{DateTime, NaiveDate, Utc};
use fhirsync_core::{
    ConceptTriple, ExternalResourceRef, Gender, HumanName, ObservationStatus, Quantity,
    ResourceType,
};
use fhirsync_client::RawResource;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Per-record mapping failure. Non-fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The resource type is not handled by the engine
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A mandatory field is absent
    #[error("missing field: {resource_type}.{field}")]
    MissingField {
        /// Resource type being mapped
        resource_type: &'static str,
        /// Dotted path of the missing field
        field: &'static str,
    },

    /// A timestamp field could not be parsed
    #[error("invalid timestamp in {field}: {value}")]
    InvalidTimestamp {
        /// Dotted path of the field
        field: &'static str,
        /// Offending wire value
        value: String,
    },

    /// A field is present but malformed
    #[error("invalid value in {field}: {detail}")]
    InvalidValue {
        /// Dotted path of the field
        field: &'static str,
        /// What was wrong
        detail: String,
    },
}

impl MappingError {
    fn missing(resource_type: &'static str, field: &'static str) -> Self {
        Self::MissingField {
            resource_type,
            field,
        }
    }

    fn invalid_value(field: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            detail: detail.into(),
        }
    }
}

/// A validated external record, ready for reconciliation.
#[derive(Debug, Clone)]
pub enum MappedRecord {
    /// A mapped Patient resource
    Patient(MappedPatient),
    /// A mapped Observation resource
    Observation(MappedObservation),
}

impl MappedRecord {
    /// Identity of the source resource.
    pub fn external_ref(&self) -> &ExternalResourceRef {
        match self {
            MappedRecord::Patient(p) => &p.external_ref,
            MappedRecord::Observation(o) => &o.external_ref,
        }
    }
}

/// A validated external Patient.
#[derive(Debug, Clone)]
pub struct MappedPatient {
    /// Identity of the source resource
    pub external_ref: ExternalResourceRef,
    /// Source-provided `meta.lastUpdated`
    pub version_marker: Option<DateTime<Utc>>,
    /// Names
    pub name: Vec<HumanName>,
    /// Administrative gender
    pub gender: Option<Gender>,
    /// Date of birth
    pub birth_date: Option<NaiveDate>,
}

/// A validated external Observation.
#[derive(Debug, Clone)]
pub struct MappedObservation {
    /// Identity of the source resource
    pub external_ref: ExternalResourceRef,
    /// Source-provided `meta.lastUpdated`
    pub version_marker: Option<DateTime<Utc>>,
    /// External id of the owning patient, from `subject.reference`
    pub subject_id: String,
    /// Clinical status
    pub status: ObservationStatus,
    /// Identity of the primary code, first entry of `code.coding[]`
    pub code_key: (String, String),
    /// All concept triples on the resource, deduplicated in order
    pub concepts: Vec<ConceptTriple>,
    /// Measured value
    pub value: Quantity,
    /// Start of the clinically effective window
    pub effective_start: DateTime<Utc>,
    /// End of the clinically effective window
    pub effective_end: DateTime<Utc>,
    /// Release time, when provided
    pub issued: Option<DateTime<Utc>>,
}

/// Map one raw resource from `source_endpoint` into the internal model.
pub fn map_resource(
    raw: &RawResource,
    source_endpoint: &str,
) -> Result<MappedRecord, MappingError> {
    let resource_type = raw
        .resource_type()
        .ok_or(MappingError::missing("Resource", "resourceType"))?;

    match resource_type.parse::<ResourceType>() {
        Ok(ResourceType::Patient) => map_patient(raw, source_endpoint).map(MappedRecord::Patient),
        Ok(ResourceType::Observation) => {
            map_observation(raw, source_endpoint).map(MappedRecord::Observation)
        }
        Err(_) => Err(MappingError::UnknownResourceType(resource_type.to_string())),
    }
}

fn map_patient(raw: &RawResource, endpoint: &str) -> Result<MappedPatient, MappingError> {
    let id = raw.id().ok_or(MappingError::missing("Patient", "id"))?;
    let external_ref = ExternalResourceRef::new(ResourceType::Patient, id, endpoint);

    let gender = match raw.get("gender").and_then(Value::as_str) {
        Some(g) => Some(
            Gender::parse(g)
                .ok_or_else(|| MappingError::invalid_value("gender", format!("'{g}'")))?,
        ),
        None => None,
    };

    let birth_date = match raw.get("birthDate").and_then(Value::as_str) {
        Some(d) => Some(NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
            MappingError::InvalidTimestamp {
                field: "birthDate",
                value: d.to_string(),
            }
        })?),
        None => None,
    };

    Ok(MappedPatient {
        external_ref,
        version_marker: version_marker(raw)?,
        name: human_names(raw.get("name")),
        gender,
        birth_date,
    })
}

fn map_observation(raw: &RawResource, endpoint: &str) -> Result<MappedObservation, MappingError> {
    let id = raw.id().ok_or(MappingError::missing("Observation", "id"))?;
    let external_ref = ExternalResourceRef::new(ResourceType::Observation, id, endpoint);

    let status_str = raw
        .get("status")
        .and_then(Value::as_str)
        .ok_or(MappingError::missing("Observation", "status"))?;
    let status = ObservationStatus::parse(status_str)
        .ok_or_else(|| MappingError::invalid_value("status", format!("'{status_str}'")))?;

    let subject_id = subject_reference(raw)?;

    let mut concepts = Vec::new();
    let mut seen = HashSet::new();
    collect_codings(raw.get("code"), &mut concepts, &mut seen);
    if let Some(categories) = raw.get("category").and_then(Value::as_array) {
        for category in categories {
            collect_codings(Some(category), &mut concepts, &mut seen);
        }
    }
    let code_key = primary_code(raw.get("code"))
        .ok_or(MappingError::missing("Observation", "code.coding"))?;

    let issued = optional_datetime(raw.get("issued"), "issued")?;
    let (effective_start, effective_end) = effective_window(raw, issued)?;

    Ok(MappedObservation {
        external_ref,
        version_marker: version_marker(raw)?,
        subject_id,
        status,
        code_key,
        concepts,
        value: quantity(raw)?,
        effective_start,
        effective_end,
        issued,
    })
}

/// `meta.lastUpdated`, when present. Malformed markers are a mapping failure:
/// an unparseable marker would corrupt every later update/skip decision for
/// the record.
fn version_marker(raw: &RawResource) -> Result<Option<DateTime<Utc>>, MappingError> {
    let last_updated = raw
        .get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .cloned();
    optional_datetime(last_updated.as_ref(), "meta.lastUpdated")
}

fn optional_datetime(
    value: Option<&Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, MappingError> {
    match value.and_then(Value::as_str) {
        Some(s) => parse_datetime(s, field).map(Some),
        None => Ok(None),
    }
}

fn parse_datetime(s: &str, field: &'static str) -> Result<DateTime<Utc>, MappingError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MappingError::InvalidTimestamp {
            field,
            value: s.to_string(),
        })
}

/// FHIR `effective[x]` choice: a point datetime collapses to a zero-width
/// window, a period keeps its bounds (an open end collapses to the start),
/// and `issued` is the fallback when neither is present.
fn effective_window(
    raw: &RawResource,
    issued: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), MappingError> {
    if let Some(s) = raw.get("effectiveDateTime").and_then(Value::as_str) {
        let at = parse_datetime(s, "effectiveDateTime")?;
        return Ok((at, at));
    }

    if let Some(period) = raw.get("effectivePeriod") {
        let start = period
            .get("start")
            .and_then(Value::as_str)
            .ok_or(MappingError::missing("Observation", "effectivePeriod.start"))?;
        let start = parse_datetime(start, "effectivePeriod.start")?;
        let end = match period.get("end").and_then(Value::as_str) {
            Some(end) => parse_datetime(end, "effectivePeriod.end")?,
            None => start,
        };
        return Ok((start, end));
    }

    match issued {
        Some(at) => Ok((at, at)),
        None => Err(MappingError::missing("Observation", "effective[x]")),
    }
}

/// `valueQuantity`, falling back to the first component carrying one (for
/// composite observations such as blood pressure). An observation without any
/// quantity is malformed rather than silently skipped.
fn quantity(raw: &RawResource) -> Result<Quantity, MappingError> {
    if let Some(q) = parse_quantity(raw.get("valueQuantity")) {
        return Ok(q);
    }

    if let Some(components) = raw.get("component").and_then(Value::as_array) {
        if let Some(q) = components
            .iter()
            .find_map(|c| parse_quantity(c.get("valueQuantity")))
        {
            return Ok(q);
        }
    }

    Err(MappingError::invalid_value(
        "valueQuantity",
        "no quantity on the observation or any component",
    ))
}

fn parse_quantity(value: Option<&Value>) -> Option<Quantity> {
    let value = value?;
    Some(Quantity {
        value: value.get("value")?.as_f64()?,
        unit: value
            .get("unit")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// `subject.reference`, accepting `Patient/<id>`, `urn:uuid:<id>` or a bare id.
fn subject_reference(raw: &RawResource) -> Result<String, MappingError> {
    let reference = raw
        .get("subject")
        .and_then(|s| s.get("reference"))
        .and_then(Value::as_str)
        .ok_or(MappingError::missing("Observation", "subject.reference"))?;

    let id = reference
        .strip_prefix("Patient/")
        .or_else(|| reference.strip_prefix("urn:uuid:"))
        .unwrap_or(reference);
    if id.is_empty() {
        return Err(MappingError::invalid_value(
            "subject.reference",
            "empty reference",
        ));
    }
    Ok(id.to_string())
}

/// Extract `(system, code, display)` triples from one CodeableConcept value,
/// dropping exact `(system, code)` repeats and codings without an identity.
fn collect_codings(
    concept: Option<&Value>,
    out: &mut Vec<ConceptTriple>,
    seen: &mut HashSet<(String, String)>,
) {
    let codings = concept
        .and_then(|c| c.get("coding"))
        .and_then(Value::as_array);
    let Some(codings) = codings else { return };

    for coding in codings {
        let system = coding.get("system").and_then(Value::as_str);
        let code = coding.get("code").and_then(Value::as_str);
        let (Some(system), Some(code)) = (system, code) else {
            debug!("skipping coding without system or code");
            continue;
        };
        if !seen.insert((system.to_string(), code.to_string())) {
            continue;
        }
        let display = coding
            .get("display")
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(ConceptTriple::new(system, code, display));
    }
}

fn primary_code(code: Option<&Value>) -> Option<(String, String)> {
    let codings = code?.get("coding")?.as_array()?;
    codings.iter().find_map(|coding| {
        let system = coding.get("system")?.as_str()?;
        let code = coding.get("code")?.as_str()?;
        Some((system.to_string(), code.to_string()))
    })
}

fn human_names(value: Option<&Value>) -> Vec<HumanName> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|entry| HumanName {
            family: entry
                .get("family")
                .and_then(Value::as_str)
                .map(str::to_string),
            given: entry
                .get("given")
                .and_then(Value::as_array)
                .map(|given| {
                    given
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            text: entry
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect()
}
