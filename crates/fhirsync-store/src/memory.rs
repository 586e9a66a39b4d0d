//! In-memory store implementation with thread-safe concurrent access.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fhirsync_core::{CodeableConcept, ExternalResourceRef, Observation, Patient};
use uuid::Uuid;

use crate::{RecordStore, StoreError, StoreResult};

/// In-memory [`RecordStore`] backed by concurrent maps.
///
/// Used by the test suites and by dry runs. Secondary indexes keep the
/// external-reference and `(system, code)` lookups O(1); the concept index is
/// written through a map entry so a get-or-create race leaves exactly one
/// catalog row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    patients: DashMap<Uuid, Patient>,
    patient_refs: DashMap<ExternalResourceRef, Uuid>,
    observations: DashMap<Uuid, Observation>,
    observation_refs: DashMap<ExternalResourceRef, Uuid>,
    concepts: DashMap<Uuid, CodeableConcept>,
    concept_codes: DashMap<(String, String), Uuid>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted patients.
    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    /// Number of persisted observations.
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// Number of catalog concepts.
    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    fn index_ref(
        index: &DashMap<ExternalResourceRef, Uuid>,
        external_ref: &Option<ExternalResourceRef>,
        id: Uuid,
    ) -> StoreResult<()> {
        if let Some(r) = external_ref {
            match index.entry(r.clone()) {
                Entry::Occupied(existing) if *existing.get() != id => {
                    return Err(StoreError::DuplicateExternalRef(r.to_string()));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_patient(&self, patient: &Patient) -> StoreResult<()> {
        Self::index_ref(&self.patient_refs, &patient.external_ref, patient.id)?;
        self.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn update_patient(&self, patient: &Patient) -> StoreResult<()> {
        if !self.patients.contains_key(&patient.id) {
            return Err(StoreError::PatientNotFound(patient.id));
        }
        Self::index_ref(&self.patient_refs, &patient.external_ref, patient.id)?;
        self.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        Ok(self.patients.get(&id).map(|p| p.clone()))
    }

    async fn find_patient_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Patient>> {
        match self.patient_refs.get(external_ref) {
            Some(id) => self.get_patient(*id).await,
            None => Ok(None),
        }
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        Ok(self.patients.iter().map(|p| p.clone()).collect())
    }

    async fn insert_observation(&self, observation: &Observation) -> StoreResult<()> {
        if !self.patients.contains_key(&observation.patient_id) {
            return Err(StoreError::UnknownPatient(observation.patient_id));
        }
        if !self.concepts.contains_key(&observation.code_id) {
            return Err(StoreError::ConceptNotFound(observation.code_id));
        }
        Self::index_ref(&self.observation_refs, &observation.external_ref, observation.id)?;
        self.observations.insert(observation.id, observation.clone());
        Ok(())
    }

    async fn update_observation(&self, observation: &Observation) -> StoreResult<()> {
        if !self.observations.contains_key(&observation.id) {
            return Err(StoreError::ObservationNotFound(observation.id));
        }
        self.observations.insert(observation.id, observation.clone());
        Ok(())
    }

    async fn find_observation_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Observation>> {
        match self.observation_refs.get(external_ref) {
            Some(id) => Ok(self.observations.get(&id).map(|o| o.clone())),
            None => Ok(None),
        }
    }

    async fn list_observations(&self) -> StoreResult<Vec<Observation>> {
        Ok(self.observations.iter().map(|o| o.clone()).collect())
    }

    async fn find_concept(&self, system: &str, code: &str) -> StoreResult<Option<CodeableConcept>> {
        let key = (system.to_string(), code.to_string());
        match self.concept_codes.get(&key) {
            Some(id) => Ok(self.concepts.get(&id).map(|c| c.clone())),
            None => Ok(None),
        }
    }

    async fn insert_concept(&self, concept: &CodeableConcept) -> StoreResult<()> {
        match self.concept_codes.entry(concept.key()) {
            Entry::Occupied(_) => Err(StoreError::duplicate_concept(
                &concept.system,
                &concept.code,
            )),
            Entry::Vacant(slot) => {
                slot.insert(concept.id);
                self.concepts.insert(concept.id, concept.clone());
                Ok(())
            }
        }
    }

    async fn update_concept_display(&self, id: Uuid, display: &str) -> StoreResult<()> {
        match self.concepts.get_mut(&id) {
            Some(mut concept) => {
                concept.display = Some(display.to_string());
                Ok(())
            }
            None => Err(StoreError::ConceptNotFound(id)),
        }
    }

    async fn delete_concept(&self, id: Uuid) -> StoreResult<()> {
        let in_use = self.observations.iter().any(|o| o.code_id == id);
        if in_use {
            return Err(StoreError::ConceptInUse(id));
        }
        let (_, concept) = self
            .concepts
            .remove(&id)
            .ok_or(StoreError::ConceptNotFound(id))?;
        self.concept_codes.remove(&concept.key());
        Ok(())
    }

    async fn list_concepts(&self) -> StoreResult<Vec<CodeableConcept>> {
        Ok(self.concepts.iter().map(|c| c.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fhirsync_core::{ObservationStatus, ResourceType};
    use std::sync::Arc;

    fn patient_with_ref(id: &str) -> Patient {
        let mut p = Patient::new_local();
        p.external_ref = Some(ExternalResourceRef::new(
            ResourceType::Patient,
            id,
            "https://fhir.example.org",
        ));
        p
    }

    fn observation(patient_id: Uuid, code_id: Uuid) -> Observation {
        Observation {
            id: Uuid::new_v4(),
            patient_id,
            code_id,
            status: ObservationStatus::Final,
            value: None,
            effective_start: Utc::now(),
            effective_end: Utc::now(),
            issued: None,
            external_ref: None,
            version_marker: None,
        }
    }

    #[tokio::test]
    async fn test_patient_ref_lookup() {
        let store = MemoryStore::new();
        let p = patient_with_ref("p-1");
        store.insert_patient(&p).await.unwrap();

        let found = store
            .find_patient_by_ref(p.external_ref.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(p.id));
    }

    #[tokio::test]
    async fn test_duplicate_external_ref_rejected() {
        let store = MemoryStore::new();
        store.insert_patient(&patient_with_ref("p-1")).await.unwrap();

        let err = store
            .insert_patient(&patient_with_ref("p-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateExternalRef(_)));
    }

    #[tokio::test]
    async fn test_observation_requires_persisted_patient() {
        let store = MemoryStore::new();
        let concept = CodeableConcept::new("http://loinc.org", "718-7", None);
        store.insert_concept(&concept).await.unwrap();

        let err = store
            .insert_observation(&observation(Uuid::new_v4(), concept.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownPatient(_)));
    }

    #[tokio::test]
    async fn test_concept_get_or_create_is_unique() {
        let store = MemoryStore::new();
        let first = CodeableConcept::new("http://loinc.org", "2339-0", None);
        store.insert_concept(&first).await.unwrap();

        let second = CodeableConcept::new("http://loinc.org", "2339-0", None);
        let err = store.insert_concept(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateConcept { .. }));
        assert_eq!(store.concept_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_concept_inserts_leave_one_row() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let concept = CodeableConcept::new("http://loinc.org", "85354-9", None);
                store.insert_concept(&concept).await
            }));
        }

        let mut ok = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StoreError::DuplicateConcept { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(store.concept_count(), 1);
    }

    #[tokio::test]
    async fn test_concept_in_use_cannot_be_deleted() {
        let store = MemoryStore::new();
        let patient = patient_with_ref("p-1");
        store.insert_patient(&patient).await.unwrap();
        let concept = CodeableConcept::new("http://loinc.org", "718-7", None);
        store.insert_concept(&concept).await.unwrap();
        store
            .insert_observation(&observation(patient.id, concept.id))
            .await
            .unwrap();

        let err = store.delete_concept(concept.id).await.unwrap_err();
        assert!(matches!(err, StoreError::ConceptInUse(_)));
    }

    #[tokio::test]
    async fn test_display_refresh_keeps_identity() {
        let store = MemoryStore::new();
        let concept = CodeableConcept::new("http://loinc.org", "718-7", None);
        store.insert_concept(&concept).await.unwrap();

        store
            .update_concept_display(concept.id, "Hemoglobin")
            .await
            .unwrap();
        let found = store
            .find_concept("http://loinc.org", "718-7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, concept.id);
        assert_eq!(found.display.as_deref(), Some("Hemoglobin"));
    }
}
