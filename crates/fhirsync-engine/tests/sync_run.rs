//! End-to-end sync runs against a fixture source and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use fhirsync_client::{ClientConfig, FhirClient, FixtureTransport, InjectedFault, RawBundle};
use fhirsync_core::{RecordOutcome, ResourceType, SyncRunReport};
use fhirsync_engine::{run_sync, CancelToken, SyncConfig, SyncEngine, SyncError};
use fhirsync_store::{MemoryStore, RecordStore};
use serde_json::{json, Value};

const SOURCE: &str = "https://s";
const PATIENT_URL: &str = "https://s/Patient?_count=10";
const OBSERVATION_URL: &str = "https://s/Observation?_count=10";

fn bundle(resources: Vec<Value>, next: Option<&str>) -> RawBundle {
    let entry: Vec<Value> = resources.into_iter().map(|r| json!({"resource": r})).collect();
    let mut link = vec![];
    if let Some(next) = next {
        link.push(json!({"relation": "next", "url": next}));
    }
    serde_json::from_value(json!({
        "resourceType": "Bundle",
        "link": link,
        "entry": entry
    }))
    .unwrap()
}

fn patient(id: &str, updated: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "gender": "female",
        "birthDate": "1984-05-12",
        "name": [{"family": "Doe", "given": ["Jane"]}],
        "meta": {"lastUpdated": updated}
    })
}

fn observation(id: &str, subject: &str, code: &str, updated: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "subject": {"reference": format!("Patient/{subject}")},
        "code": {"coding": [
            {"system": "http://loinc.org", "code": code, "display": "Test"}
        ]},
        "valueQuantity": {"value": 42.0, "unit": "g/dL"},
        "effectiveDateTime": "2026-08-01T10:00:00Z",
        "meta": {"lastUpdated": updated}
    })
}

struct Harness {
    transport: Arc<FixtureTransport>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(FixtureTransport::new());
        // Both types always paginate cleanly unless a test overrides a page.
        transport.register(PATIENT_URL, bundle(vec![], None));
        transport.register(OBSERVATION_URL, bundle(vec![], None));
        Self {
            transport,
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn client(&self) -> FhirClient {
        let mut config = ClientConfig::new(SOURCE);
        config.page_size = 10;
        config.backoff_base = Duration::from_millis(1);
        FhirClient::new(self.transport.clone(), config)
    }

    async fn run(&self) -> SyncRunReport {
        run_sync(self.client(), self.store.clone(), SyncConfig::default())
            .await
            .unwrap()
    }
}

fn outcomes(report: &SyncRunReport, outcome: RecordOutcome) -> usize {
    report
        .records
        .iter()
        .filter(|r| r.outcome == outcome)
        .count()
}

#[tokio::test]
async fn test_first_run_inserts_everything() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(
            vec![
                patient("p-1", "2026-08-01T00:00:00Z"),
                patient("p-2", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z")],
            None,
        ),
    );

    let report = h.run().await;

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.inserted, 3);
    assert!(report.is_clean());
    assert_eq!(h.store.list_patients().await.unwrap().len(), 2);
    assert_eq!(h.store.list_observations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_run_against_unchanged_source_only_skips() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z")],
            None,
        ),
    );

    let first = h.run().await;
    assert_eq!(first.inserted, 2);

    let second = h.run().await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(h.store.list_patients().await.unwrap().len(), 1);
    assert_eq!(h.store.list_observations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shared_code_yields_one_concept() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![
                observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z"),
                observation("o-2", "p-1", "718-7", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );

    h.run().await;

    let concepts = h.store.list_concepts().await.unwrap();
    assert_eq!(concepts.len(), 1);
    let code_id = concepts[0].id;
    for obs in h.store.list_observations().await.unwrap() {
        assert_eq!(obs.code_id, code_id);
    }
}

#[tokio::test]
async fn test_observation_arriving_before_its_patient_is_deferred() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z")],
            None,
        ),
    );

    // Observations paginate first, so the subject is unknown on first sight.
    let config = SyncConfig {
        resource_types: vec![ResourceType::Observation, ResourceType::Patient],
        ..SyncConfig::default()
    };
    let report = run_sync(h.client(), h.store.clone(), config).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert!(report.is_clean());
    let patients = h.store.list_patients().await.unwrap();
    let observations = h.store.list_observations().await.unwrap();
    assert_eq!(observations[0].patient_id, patients[0].id);
}

#[tokio::test]
async fn test_malformed_record_does_not_poison_the_page() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(
            vec![
                patient("p-1", "2026-08-01T00:00:00Z"),
                json!({"resourceType": "Patient"}),
                patient("p-3", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );

    let report = h.run().await;

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(outcomes(&report, RecordOutcome::MappingFailed), 1);
    assert_eq!(h.store.list_patients().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_write_inside_a_batch_is_isolated() {
    let h = Harness::new();
    // The same external id twice in one page queues two inserts for one
    // reference; the second is rejected at flush and must not take the
    // rest of the batch down.
    h.transport.register(
        PATIENT_URL,
        bundle(
            vec![
                patient("p-1", "2026-08-01T00:00:00Z"),
                patient("p-1", "2026-08-01T00:00:00Z"),
                patient("p-2", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );

    let report = h.run().await;

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(outcomes(&report, RecordOutcome::PersistenceFailed), 1);
    assert_eq!(h.store.list_patients().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_newer_source_version_updates_in_place() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.run().await;

    let before = h.store.list_patients().await.unwrap();

    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-02T00:00:00Z")], None),
    );
    let report = h.run().await;

    assert_eq!(report.updated, 1);
    let after = h.store.list_patients().await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id, "local identity is stable");
    assert!(after[0].version_marker > before[0].version_marker);
}

#[tokio::test]
async fn test_equal_or_older_source_version_skips() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-02T00:00:00Z")], None),
    );
    h.run().await;

    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    let report = h.run().await;

    assert_eq!(report.skipped, 1);
    assert_eq!(report.updated, 0);
    let stored = h.store.list_patients().await.unwrap();
    assert_eq!(
        stored[0].version_marker,
        Some("2026-08-02T00:00:00Z".parse().unwrap())
    );
}

#[tokio::test]
async fn test_dangling_subject_fails_only_that_observation() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(
            vec![
                patient("p-1", "2026-08-01T00:00:00Z"),
                patient("p-2", "2026-08-01T00:00:00Z"),
                patient("p-3", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![
                observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z"),
                observation("o-2", "p-4", "718-7", "2026-08-01T00:00:00Z"),
            ],
            None,
        ),
    );

    let report = h.run().await;

    assert_eq!(report.total_fetched, 5);
    assert_eq!(report.inserted, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(outcomes(&report, RecordOutcome::DanglingReference), 1);
    assert_eq!(h.store.list_observations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pagination_failure_midway_keeps_earlier_work() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport
        .inject_fault(OBSERVATION_URL, InjectedFault::Rejected(403));

    let report = h.run().await;

    assert_eq!(report.inserted, 1);
    assert_eq!(report.source_errors.len(), 1);
    assert!(!report.is_clean());
    assert_eq!(h.store.list_patients().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_source_fails_the_run() {
    let h = Harness::new();
    for _ in 0..3 {
        h.transport
            .inject_fault(PATIENT_URL, InjectedFault::Transient);
    }

    let err = run_sync(h.client(), h.store.clone(), SyncConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SourceUnreachable(_)));
    assert!(h.store.list_patients().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_faults_within_retry_limit_still_succeed() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport
        .inject_fault(PATIENT_URL, InjectedFault::Transient);
    h.transport
        .inject_fault(PATIENT_URL, InjectedFault::Transient);

    let report = h.run().await;

    assert_eq!(report.inserted, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_multi_page_pull_follows_next_links() {
    let h = Harness::new();
    let next = "https://s/Patient?_count=10&page=2";
    h.transport.register(
        PATIENT_URL,
        bundle(
            vec![
                patient("p-1", "2026-08-01T00:00:00Z"),
                patient("p-2", "2026-08-01T00:00:00Z"),
            ],
            Some(next),
        ),
    );
    h.transport
        .register(next, bundle(vec![patient("p-3", "2026-08-01T00:00:00Z")], None));

    let report = h.run().await;

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.inserted, 3);
}

#[tokio::test]
async fn test_cancelled_run_finalizes_with_completed_work() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = SyncEngine::new(h.client(), h.store.clone(), SyncConfig::default())
        .run(cancel)
        .await
        .unwrap();

    assert_eq!(report.inserted, 0);
    assert!(h.store.list_patients().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_display_text_refreshes_on_resync() {
    let h = Harness::new();
    h.transport.register(
        PATIENT_URL,
        bundle(vec![patient("p-1", "2026-08-01T00:00:00Z")], None),
    );
    h.transport.register(
        OBSERVATION_URL,
        bundle(
            vec![observation("o-1", "p-1", "718-7", "2026-08-01T00:00:00Z")],
            None,
        ),
    );
    h.run().await;

    let mut renamed = observation("o-2", "p-1", "718-7", "2026-08-01T00:00:00Z");
    renamed["code"]["coding"][0]["display"] = json!("Hemoglobin [Mass/volume] in Blood");
    h.transport
        .register(OBSERVATION_URL, bundle(vec![renamed], None));
    h.run().await;

    let concepts = h.store.list_concepts().await.unwrap();
    assert_eq!(concepts.len(), 1);
    assert_eq!(
        concepts[0].display.as_deref(),
        Some("Hemoglobin [Mass/volume] in Blood")
    );
}
