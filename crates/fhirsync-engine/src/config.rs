//! Sync run configuration.

use chrono::{DateTime, Utc};
use fhirsync_core::ResourceType;
use std::time::Duration;

/// Configuration for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Resource types to pull, in processing order
    pub resource_types: Vec<ResourceType>,

    /// Incremental sync marker; only resources updated after this instant are
    /// requested from the source
    pub since: Option<DateTime<Utc>>,

    /// Maximum writes flushed to the store in one batch
    pub batch_size: usize,

    /// Pages buffered between the fetch task and reconciliation
    pub channel_capacity: usize,

    /// Overall run deadline; on expiry remaining fetches are cancelled and the
    /// report is finalized with whatever completed
    pub run_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resource_types: vec![ResourceType::Patient, ResourceType::Observation],
            since: None,
            batch_size: 100,
            channel_capacity: 4,
            run_timeout: None,
        }
    }
}
