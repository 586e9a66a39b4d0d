//! CLI commands module.

pub mod sync;

pub use sync::SyncCommand;
