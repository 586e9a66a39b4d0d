//! # FHIRSync Client
//!
//! Paginated read client for external FHIR sources.
//!
//! [`FhirClient`] pages through a source following the FHIR Bundle convention
//! (`entry[]`, `link[].relation=next`) and yields raw resources lazily, one
//! page at a time. Transient failures are retried with bounded exponential
//! backoff; a non-transient rejection ends pagination without discarding
//! resources already yielded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod client;
pub mod error;
pub mod transport;

pub use bundle::{RawBundle, RawEntry, RawLink, RawResource};
pub use client::{ClientConfig, FhirClient, ResourcePages};
pub use error::{ClientError, ClientResult};
pub use transport::{FixtureTransport, HttpTransport, InjectedFault, SourceTransport};
