//! Run-level error types.
//!
//! Per-record failures never surface here; they are recorded in the
//! [`SyncRunReport`](fhirsync_core::SyncRunReport) and the run completes.

use fhirsync_client::ClientError;
use thiserror::Error;

/// Result type alias for run-level operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors that abort a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The source could not be reached at all: every retry of the very first
    /// page failed
    #[error("source unreachable: {0}")]
    SourceUnreachable(#[source] ClientError),
}
