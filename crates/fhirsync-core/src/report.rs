//! Per-run sync outcome accumulator.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reference::ExternalResourceRef;

/// Terminal outcome for one reconciled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// A new local entity was created
    Inserted,
    /// Mutable fields of an existing local entity were overwritten
    Updated,
    /// The local entity was already in sync
    Skipped,
    /// The raw resource could not be mapped to the internal model
    MappingFailed,
    /// The owning patient could not be resolved after the deferred pass
    DanglingReference,
    /// Local storage rejected the write
    PersistenceFailed,
}

impl RecordOutcome {
    /// Whether this outcome counts as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RecordOutcome::MappingFailed
                | RecordOutcome::DanglingReference
                | RecordOutcome::PersistenceFailed
        )
    }
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordOutcome::Inserted => "inserted",
            RecordOutcome::Updated => "updated",
            RecordOutcome::Skipped => "skipped",
            RecordOutcome::MappingFailed => "mapping-failed",
            RecordOutcome::DanglingReference => "dangling-reference",
            RecordOutcome::PersistenceFailed => "persistence-failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one record, with the originating external reference when known
/// and error detail for failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    /// Identity of the source resource; absent when mapping failed before the
    /// resource id could be read
    pub external_ref: Option<ExternalResourceRef>,

    /// Terminal outcome
    pub outcome: RecordOutcome,

    /// Underlying error detail for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl fmt::Display for RecordResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.external_ref {
            Some(r) => write!(f, "{}: {}", r, self.outcome)?,
            None => write!(f, "-: {}", self.outcome)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// One-per-invocation accumulator of sync outcomes.
///
/// Ephemeral: returned to the caller and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRunReport {
    /// Number of raw resources yielded by the source
    pub total_fetched: u64,

    /// Records inserted
    pub inserted: u64,

    /// Records updated
    pub updated: u64,

    /// Records already in sync
    pub skipped: u64,

    /// Records that terminated in a failure outcome
    pub failed: u64,

    /// Ordered per-record results
    pub records: Vec<RecordResult>,

    /// Page-level source errors that ended pagination early for a resource
    /// type without failing the run
    pub source_errors: Vec<String>,
}

impl SyncRunReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record outcome.
    pub fn record(
        &mut self,
        external_ref: Option<ExternalResourceRef>,
        outcome: RecordOutcome,
        detail: Option<String>,
    ) {
        match outcome {
            RecordOutcome::Inserted => self.inserted += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
        self.records.push(RecordResult {
            external_ref,
            outcome,
            detail,
        });
    }

    /// Note that `count` raw resources were yielded by the source.
    pub fn add_fetched(&mut self, count: u64) {
        self.total_fetched += count;
    }

    /// Note a page-level source error that ended pagination for one type.
    pub fn add_source_error(&mut self, detail: impl Into<String>) {
        self.source_errors.push(detail.into());
    }

    /// The failure entries, in arrival order.
    pub fn failures(&self) -> impl Iterator<Item = &RecordResult> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }

    /// Whether the run completed without any failure outcome or source error.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.source_errors.is_empty()
    }
}

impl fmt::Display for SyncRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} inserted={} updated={} skipped={} failed={}",
            self.total_fetched, self.inserted, self.updated, self.skipped, self.failed
        )
    }
}
