//! Core store trait the reconciliation engine writes through.

use async_trait::async_trait;
use fhirsync_core::{CodeableConcept, ExternalResourceRef, Observation, Patient};
use uuid::Uuid;

use crate::StoreResult;

/// Persistence boundary for patients, observations and the concept catalog.
///
/// All writes are short, per-record operations; the engine owns batching and
/// ordering. Implementations must uphold two invariants:
///
/// - at most one record per distinct external reference, and
/// - at most one concept per `(system, code)` pair — a concurrent duplicate
///   insert surfaces as [`StoreError::DuplicateConcept`] so the caller can
///   re-read the winner.
///
/// [`StoreError::DuplicateConcept`]: crate::StoreError::DuplicateConcept
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new patient.
    async fn insert_patient(&self, patient: &Patient) -> StoreResult<()>;

    /// Overwrite an existing patient.
    async fn update_patient(&self, patient: &Patient) -> StoreResult<()>;

    /// Fetch a patient by local id.
    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>>;

    /// Fetch a patient by external reference.
    async fn find_patient_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Patient>>;

    /// All persisted patients.
    async fn list_patients(&self) -> StoreResult<Vec<Patient>>;

    /// Persist a new observation. Fails with `UnknownPatient` when the
    /// referenced patient is not persisted.
    async fn insert_observation(&self, observation: &Observation) -> StoreResult<()>;

    /// Overwrite an existing observation.
    async fn update_observation(&self, observation: &Observation) -> StoreResult<()>;

    /// Fetch an observation by external reference.
    async fn find_observation_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Observation>>;

    /// All persisted observations.
    async fn list_observations(&self) -> StoreResult<Vec<Observation>>;

    /// Fetch a concept by its `(system, code)` identity.
    async fn find_concept(&self, system: &str, code: &str) -> StoreResult<Option<CodeableConcept>>;

    /// Persist a new concept. Fails with `DuplicateConcept` when the
    /// `(system, code)` pair already exists.
    async fn insert_concept(&self, concept: &CodeableConcept) -> StoreResult<()>;

    /// Refresh the display text of an existing concept. Identity fields are
    /// immutable.
    async fn update_concept_display(&self, id: Uuid, display: &str) -> StoreResult<()>;

    /// Remove a concept. Fails with `ConceptInUse` while any observation
    /// references it.
    async fn delete_concept(&self, id: Uuid) -> StoreResult<()>;

    /// All catalog concepts.
    async fn list_concepts(&self) -> StoreResult<Vec<CodeableConcept>>;
}
