//! # FHIRSync Engine
//!
//! Reconciliation engine for external FHIR sources.
//!
//! The engine pulls raw resources through [`fhirsync_client`], maps them into
//! the internal model, resolves CodeableConcepts against the local catalog,
//! and merges each record into the store without creating duplicates or
//! losing previously recorded local data. Runs are idempotent: re-running
//! against an unchanged source only skips.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod mapper;
pub mod reconciler;
pub mod resolver;

pub use cancel::CancelToken;
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use mapper::{map_resource, MappedObservation, MappedPatient, MappedRecord, MappingError};
pub use reconciler::{run_sync, SyncEngine};
pub use resolver::ConceptResolver;
