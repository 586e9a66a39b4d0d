//! Concept catalog resolution with per-run caching.

use fhirsync_core::{CodeableConcept, ConceptTriple};
use fhirsync_store::{RecordStore, StoreError, StoreResult};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Resolves `(system, code)` triples to catalog ids, creating missing entries.
///
/// Lives for one sync run. The cache only ever holds ids that are persisted,
/// so repeated triples within a run cost no store round trips. A concurrent
/// duplicate insert from another writer surfaces as
/// [`StoreError::DuplicateConcept`] and is resolved by re-reading the winner.
pub struct ConceptResolver<'a> {
    store: &'a dyn RecordStore,
    cache: HashMap<(String, String), Uuid>,
}

impl<'a> ConceptResolver<'a> {
    /// Create a resolver over the given store with an empty cache.
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Resolve a triple to the id of its catalog entry, inserting it when
    /// absent. An existing entry whose display text differs from a non-empty
    /// incoming display is refreshed in place.
    pub async fn get_or_create(&mut self, triple: &ConceptTriple) -> StoreResult<Uuid> {
        if let Some(id) = self.cache.get(&triple.key()) {
            return Ok(*id);
        }

        if let Some(existing) = self.store.find_concept(&triple.system, &triple.code).await? {
            self.refresh_display(&existing, triple).await?;
            self.cache.insert(triple.key(), existing.id);
            return Ok(existing.id);
        }

        let concept =
            CodeableConcept::new(&triple.system, &triple.code, triple.display.clone());
        match self.store.insert_concept(&concept).await {
            Ok(()) => {
                self.cache.insert(triple.key(), concept.id);
                Ok(concept.id)
            }
            Err(StoreError::DuplicateConcept { .. }) => {
                // Lost the race: another writer inserted the same pair.
                debug!(
                    system = %triple.system,
                    code = %triple.code,
                    "concept insert raced, re-reading winner"
                );
                let winner = self
                    .store
                    .find_concept(&triple.system, &triple.code)
                    .await?
                    .ok_or_else(|| {
                        StoreError::duplicate_concept(&triple.system, &triple.code)
                    })?;
                self.cache.insert(triple.key(), winner.id);
                Ok(winner.id)
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_display(
        &self,
        existing: &CodeableConcept,
        triple: &ConceptTriple,
    ) -> StoreResult<()> {
        let Some(display) = triple.display.as_deref() else {
            return Ok(());
        };
        if display.is_empty() || existing.display.as_deref() == Some(display) {
            return Ok(());
        }
        self.store
            .update_concept_display(existing.id, display)
            .await
    }
}
