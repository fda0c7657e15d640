//! Error types for bench-forge operations.
//!
//! Per-subsystem error enums. Selection and configuration errors are fatal
//! before any work starts; ledger write errors are fatal to the whole run
//! because an unrecorded outcome breaks the resume invariant. Per-attempt
//! sandbox faults are *not* represented here — they are recorded on the
//! attempt itself as `outcome = error` and the run continues.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from resolving a task selection expression.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid task selection '{token}': {reason}")]
    InvalidSelection { token: String, reason: String },
}

/// Errors from the append-only run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to append ledger entry: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize ledger entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from loading or validating the harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("benchmark fixture missing: {0}")]
    MissingFixture(PathBuf),

    #[error("task suite at {path} is invalid: {reason}")]
    InvalidSuite { path: PathBuf, reason: String },

    #[error("docker is not available: {0}")]
    DockerUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
