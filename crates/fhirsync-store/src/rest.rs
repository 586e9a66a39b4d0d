//! REST-backed store talking to the record service's CRUD API.

use async_trait::async_trait;
use fhirsync_core::{CodeableConcept, ExternalResourceRef, Observation, Patient};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{RecordStore, StoreError, StoreResult};

/// Configuration for [`RestStore`].
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Base URL of the record service, e.g. `https://tracker.example.org`
    pub base_url: Url,

    /// Bearer token, if the service requires one
    pub token: Option<String>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl RestStoreConfig {
    /// Configuration with the default 30s request timeout.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// List envelope used by the record service.
#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
struct DisplayPatch<'a> {
    display: &'a str,
}

/// [`RecordStore`] implementation over the record service's CRUD API.
///
/// The service exposes plain collection endpoints (`/api/patients`,
/// `/api/observations`, `/api/codeable-concepts`) without by-reference query
/// support, so reference lookups list the collection and scan. Acceptable for
/// sync-job volumes; revisit if the service grows a `?externalRef=` filter.
pub struct RestStore {
    http: reqwest::Client,
    config: RestStoreConfig,
}

impl RestStore {
    /// Build a store for the given record service.
    pub fn new(config: RestStoreConfig) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api{}",
            self.config.base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(&self, response: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(StoreError::rejected(status.as_u16(), detail))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<T> {
        debug!(path, "store GET");
        let response = self
            .authorized(self.http.get(self.endpoint(path)))
            .send()
            .await?;
        let body = self.check(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> StoreResult<reqwest::Response> {
        debug!(path, "store POST");
        let response = self
            .authorized(self.http.post(self.endpoint(path)))
            .json(body)
            .send()
            .await?;
        self.check(response).await
    }

    async fn patch_json<B: Serialize>(&self, path: &str, body: &B) -> StoreResult<()> {
        debug!(path, "store PATCH");
        let response = self
            .authorized(self.http.patch(self.endpoint(path)))
            .json(body)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn insert_patient(&self, patient: &Patient) -> StoreResult<()> {
        match self.post_json("/patients", patient).await {
            Ok(_) => Ok(()),
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                let detail = patient
                    .external_ref
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| patient.id.to_string());
                Err(StoreError::DuplicateExternalRef(detail))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.patch_json(&format!("/patients/{}", patient.id), patient)
            .await
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        match self.get_json(&format!("/patients/{id}")).await {
            Ok(patient) => Ok(Some(patient)),
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_patient_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Patient>> {
        let patients = self.list_patients().await?;
        Ok(patients
            .into_iter()
            .find(|p| p.external_ref.as_ref() == Some(external_ref)))
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let response: ItemsResponse<Patient> = self.get_json("/patients").await?;
        Ok(response.items)
    }

    async fn insert_observation(&self, observation: &Observation) -> StoreResult<()> {
        match self.post_json("/observations", observation).await {
            Ok(_) => Ok(()),
            Err(StoreError::Rejected { status, .. })
                if status == StatusCode::UNPROCESSABLE_ENTITY.as_u16() =>
            {
                Err(StoreError::UnknownPatient(observation.patient_id))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_observation(&self, observation: &Observation) -> StoreResult<()> {
        self.patch_json(&format!("/observations/{}", observation.id), observation)
            .await
    }

    async fn find_observation_by_ref(
        &self,
        external_ref: &ExternalResourceRef,
    ) -> StoreResult<Option<Observation>> {
        let observations = self.list_observations().await?;
        Ok(observations
            .into_iter()
            .find(|o| o.external_ref.as_ref() == Some(external_ref)))
    }

    async fn list_observations(&self) -> StoreResult<Vec<Observation>> {
        let response: ItemsResponse<Observation> = self.get_json("/observations").await?;
        Ok(response.items)
    }

    async fn find_concept(&self, system: &str, code: &str) -> StoreResult<Option<CodeableConcept>> {
        let concepts = self.list_concepts().await?;
        Ok(concepts
            .into_iter()
            .find(|c| c.system == system && c.code == code))
    }

    async fn insert_concept(&self, concept: &CodeableConcept) -> StoreResult<()> {
        match self.post_json("/codeable-concepts", concept).await {
            Ok(_) => Ok(()),
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                Err(StoreError::duplicate_concept(&concept.system, &concept.code))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_concept_display(&self, id: Uuid, display: &str) -> StoreResult<()> {
        self.patch_json(&format!("/codeable-concepts/{id}"), &DisplayPatch { display })
            .await
    }

    async fn delete_concept(&self, id: Uuid) -> StoreResult<()> {
        let response = self
            .authorized(self.http.delete(self.endpoint(&format!("/codeable-concepts/{id}"))))
            .send()
            .await?;
        match self.check(response).await {
            Ok(_) => Ok(()),
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                Err(StoreError::ConceptInUse(id))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_concepts(&self) -> StoreResult<Vec<CodeableConcept>> {
        let response: ItemsResponse<CodeableConcept> = self.get_json("/codeable-concepts").await?;
        Ok(response.items)
    }
}
