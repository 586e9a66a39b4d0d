//! # FHIRSync Core
//!
//! Core data model for the FHIR sync engine.
//!
//! This crate provides the internal entity types (Patient, Observation,
//! CodeableConcept), the stable external resource identity used for idempotent
//! matching, and the per-run sync report.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod concept;
pub mod observation;
pub mod patient;
pub mod reference;
pub mod report;

pub use concept::{CodeableConcept, ConceptTriple};
pub use observation::{Observation, ObservationStatus, Quantity};
pub use patient::{Gender, HumanName, Patient};
pub use reference::{ExternalResourceRef, ParseResourceTypeError, ResourceType};
pub use report::{RecordOutcome, RecordResult, SyncRunReport};
