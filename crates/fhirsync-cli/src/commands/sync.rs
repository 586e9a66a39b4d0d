//! Sync command implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use fhirsync_client::{
    ClientConfig, FhirClient, FixtureTransport, HttpTransport, RawBundle, RawEntry,
    SourceTransport,
};
use fhirsync_core::ResourceType;
use fhirsync_engine::{CancelToken, SyncConfig, SyncEngine};
use fhirsync_store::{MemoryStore, RecordStore, RestStore, RestStoreConfig};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Run one sync against a FHIR source
#[derive(Args)]
pub struct SyncCommand {
    /// Base URL of the source FHIR server
    #[arg(short, long)]
    pub endpoint: String,

    /// Bearer token for the source server
    #[arg(long, env = "FHIRSYNC_SOURCE_TOKEN")]
    pub source_token: Option<String>,

    /// Read Patient resources from a JSON file (Bundle or resource array)
    /// instead of fetching from the source server
    #[arg(long, requires = "observations_file")]
    pub patients_file: Option<PathBuf>,

    /// Read Observation resources from a JSON file (Bundle or resource
    /// array) instead of fetching from the source server
    #[arg(long, requires = "patients_file")]
    pub observations_file: Option<PathBuf>,

    /// Base URL of the record service to write into; omit for a dry run
    /// against an in-memory store
    #[arg(long)]
    pub target_url: Option<Url>,

    /// Bearer token for the record service
    #[arg(long, env = "FHIRSYNC_TARGET_TOKEN")]
    pub target_token: Option<String>,

    /// Only pull resources updated after this instant (RFC 3339)
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Resource types to pull, in order
    #[arg(long, value_delimiter = ',', default_values = ["Patient", "Observation"])]
    pub types: Vec<ResourceType>,

    /// Page size requested from the source
    #[arg(long, default_value_t = 50)]
    pub page_size: u32,

    /// Records flushed to the store per batch
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Abort the run after this many seconds, keeping completed work
    #[arg(long)]
    pub run_timeout: Option<u64>,
}

impl SyncCommand {
    /// Execute the sync command
    pub async fn execute(&self) -> Result<()> {
        let mut client_config = ClientConfig::new(&self.endpoint);
        client_config.page_size = self.page_size;

        let transport: Arc<dyn SourceTransport> =
            match (&self.patients_file, &self.observations_file) {
                (Some(patients), Some(observations)) => {
                    info!("reading resources from local files");
                    let fixture = FixtureTransport::new();
                    fixture.register(
                        client_config.first_page_url(ResourceType::Patient, self.since),
                        load_bundle(patients)?,
                    );
                    fixture.register(
                        client_config.first_page_url(ResourceType::Observation, self.since),
                        load_bundle(observations)?,
                    );
                    Arc::new(fixture)
                }
                _ => Arc::new(HttpTransport::new(
                    client_config.request_timeout,
                    self.source_token.clone(),
                )?),
            };
        let client = FhirClient::new(transport, client_config);

        let store: Arc<dyn RecordStore> = match &self.target_url {
            Some(url) => {
                let mut config = RestStoreConfig::new(url.clone());
                config.token = self.target_token.clone();
                Arc::new(RestStore::new(config)?)
            }
            None => {
                info!("no target configured, dry run against an in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let config = SyncConfig {
            resource_types: self.types.clone(),
            since: self.since,
            batch_size: self.batch_size,
            run_timeout: self.run_timeout.map(Duration::from_secs),
            ..SyncConfig::default()
        };

        let cancel = CancelToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing the current record");
                interrupt.cancel();
            }
        });

        let report = SyncEngine::new(client, store, config).run(cancel).await?;

        println!("{report}");
        for failure in report.failures() {
            println!("  {failure}");
        }
        for error in &report.source_errors {
            println!("  source error: {error}");
        }

        Ok(())
    }
}

/// Load a source file as a single bundle page. Accepts either a FHIR Bundle
/// or a bare array of resources.
fn load_bundle(path: &Path) -> Result<RawBundle> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in source file: {}", path.display()))?;

    match value {
        Value::Array(resources) => Ok(RawBundle {
            resource_type: "Bundle".to_string(),
            total: Some(resources.len() as u64),
            link: Vec::new(),
            entry: resources
                .into_iter()
                .map(|resource| RawEntry {
                    full_url: None,
                    resource: Some(resource),
                })
                .collect(),
        }),
        bundle => serde_json::from_value(bundle).with_context(|| {
            format!(
                "Source file is neither a Bundle nor a resource array: {}",
                path.display()
            )
        }),
    }
}
