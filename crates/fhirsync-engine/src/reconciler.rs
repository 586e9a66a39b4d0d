//! The reconciliation pipeline.
//!
//! A spawned fetch task pulls pages from the source and hands them to the
//! reconciliation loop over a bounded channel, so fetching the next page
//! overlaps with merging the previous one. All store writes happen on the
//! reconciliation side, one record at a time, so no two writes for the same
//! external reference can race.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fhirsync_client::{ClientError, FhirClient, RawResource};
use fhirsync_core::{
    ConceptTriple, ExternalResourceRef, Observation, Patient, RecordOutcome, ResourceType,
    SyncRunReport,
};
use fhirsync_store::{RecordStore, StoreResult};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mapper::{map_resource, MappedObservation, MappedPatient, MappedRecord};
use crate::resolver::ConceptResolver;

/// One sync run against one external FHIR source.
pub struct SyncEngine {
    client: FhirClient,
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
}

enum PageEvent {
    Page {
        resource_type: ResourceType,
        resources: Vec<RawResource>,
    },
    Failed {
        resource_type: ResourceType,
        error: ClientError,
        /// No page of any type had succeeded yet when this failure happened
        first: bool,
    },
}

enum PatientWrite {
    Insert(Patient),
    Update(Patient),
}

enum ObservationWrite {
    Insert(Observation),
    Update(Observation),
}

/// Mutable per-run state.
struct RunState {
    /// External patient id to local id, for every patient seen this run
    run_map: HashMap<String, Uuid>,
    /// Observations whose subject was unknown on first sight
    deferred: Vec<MappedObservation>,
    pending_patients: Vec<PatientWrite>,
    pending_observations: Vec<ObservationWrite>,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_map: HashMap::new(),
            deferred: Vec::new(),
            pending_patients: Vec::new(),
            pending_observations: Vec::new(),
        }
    }

    fn pending_len(&self) -> usize {
        self.pending_patients.len() + self.pending_observations.len()
    }
}

impl SyncEngine {
    /// Build an engine for one source and one store.
    pub fn new(client: FhirClient, store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Execute one sync run.
    ///
    /// Per-record failures are recorded in the report and never abort the
    /// run. The only fatal condition is the source being unreachable before
    /// any page was fetched. Cancellation and the run deadline are honored
    /// between records; work already flushed stands.
    pub async fn run(&self, cancel: CancelToken) -> SyncResult<SyncRunReport> {
        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let fetcher = tokio::spawn(fetch_task(
            self.client.clone(),
            self.config.resource_types.clone(),
            self.config.since,
            cancel.clone(),
            tx,
        ));

        let mut report = SyncRunReport::new();
        let mut state = RunState::new();
        let mut resolver = ConceptResolver::new(self.store.as_ref());

        info!(
            endpoint = self.client.endpoint(),
            types = ?self.config.resource_types,
            since = ?self.config.since,
            "sync run started"
        );

        'consume: while let Some(event) = rx.recv().await {
            match event {
                PageEvent::Page {
                    resource_type,
                    resources,
                } => {
                    debug!(%resource_type, count = resources.len(), "reconciling page");
                    report.add_fetched(resources.len() as u64);
                    for raw in &resources {
                        if cancel.is_cancelled() || past(deadline) {
                            warn!("run interrupted, finalizing with completed work");
                            break 'consume;
                        }
                        self.reconcile(raw, &mut state, &mut resolver, &mut report)
                            .await;
                        if state.pending_len() >= self.config.batch_size {
                            self.flush(&mut state, &mut report).await;
                        }
                    }
                }
                PageEvent::Failed {
                    resource_type,
                    error,
                    first,
                } => {
                    let fatal = matches!(
                        error,
                        ClientError::Exhausted { .. } | ClientError::Transport(_)
                    );
                    if first && fatal {
                        drop(rx);
                        let _ = fetcher.await;
                        return Err(SyncError::SourceUnreachable(error));
                    }
                    warn!(%resource_type, %error, "pagination ended early");
                    report.add_source_error(format!("{resource_type}: {error}"));
                }
            }
        }
        drop(rx);

        // Grounded patients first, then give deferred observations a second
        // chance against everything persisted this run.
        self.flush_patients(&mut state, &mut report).await;
        self.resolve_deferred(&mut state, &mut resolver, &mut report)
            .await;
        self.flush(&mut state, &mut report).await;

        let _ = fetcher.await;
        info!(%report, "sync run finished");
        Ok(report)
    }

    async fn reconcile(
        &self,
        raw: &RawResource,
        state: &mut RunState,
        resolver: &mut ConceptResolver<'_>,
        report: &mut SyncRunReport,
    ) {
        match map_resource(raw, self.client.endpoint()) {
            Ok(MappedRecord::Patient(p)) => self.reconcile_patient(p, state, report).await,
            Ok(MappedRecord::Observation(o)) => {
                self.reconcile_observation(o, state, resolver, report).await
            }
            Err(e) => {
                debug!(error = %e, "record failed mapping");
                report.record(
                    self.raw_ref(raw),
                    RecordOutcome::MappingFailed,
                    Some(e.to_string()),
                );
            }
        }
    }

    async fn reconcile_patient(
        &self,
        mapped: MappedPatient,
        state: &mut RunState,
        report: &mut SyncRunReport,
    ) {
        let existing = match self.store.find_patient_by_ref(&mapped.external_ref).await {
            Ok(existing) => existing,
            Err(e) => {
                report.record(
                    Some(mapped.external_ref),
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                );
                return;
            }
        };

        match existing {
            Some(existing) => {
                state
                    .run_map
                    .insert(mapped.external_ref.external_id.clone(), existing.id);
                if is_newer(mapped.version_marker, existing.version_marker) {
                    state
                        .pending_patients
                        .push(PatientWrite::Update(materialize_patient(
                            mapped,
                            existing.id,
                        )));
                } else {
                    report.record(Some(mapped.external_ref), RecordOutcome::Skipped, None);
                }
            }
            None => {
                let patient = materialize_patient(mapped, Uuid::new_v4());
                if let Some(r) = &patient.external_ref {
                    state.run_map.insert(r.external_id.clone(), patient.id);
                }
                state.pending_patients.push(PatientWrite::Insert(patient));
            }
        }
    }

    async fn reconcile_observation(
        &self,
        mapped: MappedObservation,
        state: &mut RunState,
        resolver: &mut ConceptResolver<'_>,
        report: &mut SyncRunReport,
    ) {
        let existing = match self
            .store
            .find_observation_by_ref(&mapped.external_ref)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                report.record(
                    Some(mapped.external_ref),
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                );
                return;
            }
        };

        if let Some(existing) = existing {
            if !is_newer(mapped.version_marker, existing.version_marker) {
                report.record(Some(mapped.external_ref), RecordOutcome::Skipped, None);
                return;
            }
            match self
                .materialize_observation(&mapped, existing.id, existing.patient_id, resolver)
                .await
            {
                Ok(obs) => state
                    .pending_observations
                    .push(ObservationWrite::Update(obs)),
                Err(e) => report.record(
                    Some(mapped.external_ref),
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                ),
            }
            return;
        }

        let patient_id = match self.resolve_subject(&mapped.subject_id, state).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(
                    subject = %mapped.subject_id,
                    "subject not yet known, deferring observation"
                );
                state.deferred.push(mapped);
                return;
            }
            Err(e) => {
                report.record(
                    Some(mapped.external_ref),
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                );
                return;
            }
        };

        match self
            .materialize_observation(&mapped, Uuid::new_v4(), patient_id, resolver)
            .await
        {
            Ok(obs) => state
                .pending_observations
                .push(ObservationWrite::Insert(obs)),
            Err(e) => report.record(
                Some(mapped.external_ref),
                RecordOutcome::PersistenceFailed,
                Some(e.to_string()),
            ),
        }
    }

    /// Map an external subject id to a local patient id: patients seen this
    /// run first, then the store, then a literal local id.
    async fn resolve_subject(
        &self,
        subject_id: &str,
        state: &mut RunState,
    ) -> StoreResult<Option<Uuid>> {
        if let Some(id) = state.run_map.get(subject_id) {
            return Ok(Some(*id));
        }

        let subject_ref = ExternalResourceRef::new(
            ResourceType::Patient,
            subject_id,
            self.client.endpoint(),
        );
        if let Some(patient) = self.store.find_patient_by_ref(&subject_ref).await? {
            state.run_map.insert(subject_id.to_string(), patient.id);
            return Ok(Some(patient.id));
        }

        if let Ok(local_id) = Uuid::parse_str(subject_id) {
            if let Some(patient) = self.store.get_patient(local_id).await? {
                return Ok(Some(patient.id));
            }
        }

        Ok(None)
    }

    /// Resolve every concept on the observation and assemble the entity.
    async fn materialize_observation(
        &self,
        mapped: &MappedObservation,
        id: Uuid,
        patient_id: Uuid,
        resolver: &mut ConceptResolver<'_>,
    ) -> StoreResult<Observation> {
        let mut code_id = None;
        for triple in &mapped.concepts {
            let concept_id = resolver.get_or_create(triple).await?;
            if triple.key() == mapped.code_key {
                code_id = Some(concept_id);
            }
        }
        let code_id = match code_id {
            Some(id) => id,
            None => {
                let (system, code) = mapped.code_key.clone();
                resolver
                    .get_or_create(&ConceptTriple::new(system, code, None))
                    .await?
            }
        };

        Ok(Observation {
            id,
            patient_id,
            code_id,
            status: mapped.status,
            value: Some(mapped.value.clone()),
            effective_start: mapped.effective_start,
            effective_end: mapped.effective_end,
            issued: mapped.issued,
            external_ref: Some(mapped.external_ref.clone()),
            version_marker: mapped.version_marker,
        })
    }

    async fn resolve_deferred(
        &self,
        state: &mut RunState,
        resolver: &mut ConceptResolver<'_>,
        report: &mut SyncRunReport,
    ) {
        let deferred = std::mem::take(&mut state.deferred);
        for mapped in deferred {
            let patient_id = match self.resolve_subject(&mapped.subject_id, state).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    report.record(
                        Some(mapped.external_ref.clone()),
                        RecordOutcome::DanglingReference,
                        Some(format!("unresolved subject '{}'", mapped.subject_id)),
                    );
                    continue;
                }
                Err(e) => {
                    report.record(
                        Some(mapped.external_ref),
                        RecordOutcome::PersistenceFailed,
                        Some(e.to_string()),
                    );
                    continue;
                }
            };
            match self
                .materialize_observation(&mapped, Uuid::new_v4(), patient_id, resolver)
                .await
            {
                Ok(obs) => state
                    .pending_observations
                    .push(ObservationWrite::Insert(obs)),
                Err(e) => report.record(
                    Some(mapped.external_ref),
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                ),
            }
        }
    }

    /// Flush pending writes, patients before the observations that reference
    /// them. A failed write is recorded and does not stop the rest of the
    /// batch.
    async fn flush(&self, state: &mut RunState, report: &mut SyncRunReport) {
        self.flush_patients(state, report).await;
        for write in state.pending_observations.drain(..) {
            let (result, obs, outcome) = match write {
                ObservationWrite::Insert(obs) => (
                    self.store.insert_observation(&obs).await,
                    obs,
                    RecordOutcome::Inserted,
                ),
                ObservationWrite::Update(obs) => (
                    self.store.update_observation(&obs).await,
                    obs,
                    RecordOutcome::Updated,
                ),
            };
            match result {
                Ok(()) => report.record(obs.external_ref, outcome, None),
                Err(e) => report.record(
                    obs.external_ref,
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                ),
            }
        }
    }

    async fn flush_patients(&self, state: &mut RunState, report: &mut SyncRunReport) {
        for write in state.pending_patients.drain(..) {
            let (result, patient, outcome) = match write {
                PatientWrite::Insert(p) => (
                    self.store.insert_patient(&p).await,
                    p,
                    RecordOutcome::Inserted,
                ),
                PatientWrite::Update(p) => (
                    self.store.update_patient(&p).await,
                    p,
                    RecordOutcome::Updated,
                ),
            };
            match result {
                Ok(()) => report.record(patient.external_ref, outcome, None),
                Err(e) => report.record(
                    patient.external_ref,
                    RecordOutcome::PersistenceFailed,
                    Some(e.to_string()),
                ),
            }
        }
    }

    /// Best-effort identity of a raw resource that failed mapping.
    fn raw_ref(&self, raw: &RawResource) -> Option<ExternalResourceRef> {
        let resource_type = raw.resource_type()?.parse().ok()?;
        let id = raw.id()?;
        Some(ExternalResourceRef::new(
            resource_type,
            id,
            self.client.endpoint(),
        ))
    }
}

/// Run one sync with default cancellation (never cancelled).
pub async fn run_sync(
    client: FhirClient,
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
) -> SyncResult<SyncRunReport> {
    SyncEngine::new(client, store, config)
        .run(CancelToken::new())
        .await
}

async fn fetch_task(
    client: FhirClient,
    resource_types: Vec<ResourceType>,
    since: Option<DateTime<Utc>>,
    cancel: CancelToken,
    tx: mpsc::Sender<PageEvent>,
) {
    let mut reached = false;
    for resource_type in resource_types {
        let mut pages = client.fetch_resources(resource_type, since);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match pages.next_page().await {
                Ok(Some(resources)) => {
                    reached = true;
                    if resources.is_empty() {
                        continue;
                    }
                    let event = PageEvent::Page {
                        resource_type,
                        resources,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    let event = PageEvent::Failed {
                        resource_type,
                        error,
                        first: !reached,
                    };
                    let _ = tx.send(event).await;
                    break;
                }
            }
        }
    }
}

fn materialize_patient(mapped: MappedPatient, id: Uuid) -> Patient {
    Patient {
        id,
        external_ref: Some(mapped.external_ref),
        name: mapped.name,
        gender: mapped.gender,
        birth_date: mapped.birth_date,
        version_marker: mapped.version_marker,
    }
}

/// Update precedence: only a present incoming marker strictly greater than
/// the stored one wins. A stored record without a marker is overwritten by
/// any marked incoming version.
fn is_newer(incoming: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (incoming, stored) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(incoming), Some(stored)) => incoming > stored,
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
