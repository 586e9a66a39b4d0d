//! # FHIRSync Store
//!
//! Persistence collaborator for the FHIR sync engine.
//!
//! The [`RecordStore`] trait is the boundary the reconciliation engine writes
//! through. Two implementations are provided: an in-memory store for tests and
//! dry runs, and a REST-backed store that talks to the record service's CRUD
//! API.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "rest")]
pub mod rest;
pub mod store;

pub use error::{StoreError, StoreResult};
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
#[cfg(feature = "rest")]
pub use rest::{RestStore, RestStoreConfig};
pub use store::RecordStore;
