//! Error taxonomy for a convergence run.
//!
//! Only `ConvergeError` aborts a run. The other kinds are collected per CN or
//! per resource and surfaced through the report.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Whole-run fatal conditions. `converge` raises these before any write; a
/// `Lock` error from the rebuild step is folded into `RebuildFailure`.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("unsupported OS family: {0}")]
    UnsupportedOsFamily(String),

    #[error("invalid desired state: {0}")]
    Descriptor(String),

    #[error("could not acquire trust-store lock {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A CN rejected by the planner. The rest of the plan continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanError {
    #[error("{cn}: missing {what} material")]
    MissingMaterial { cn: String, what: String },

    #[error("{cn}: invalid common name ({reason})")]
    InvalidCommonName { cn: String, reason: String },
}

impl PlanError {
    pub fn cn(&self) -> &str {
        match self {
            PlanError::MissingMaterial { cn, .. } => cn,
            PlanError::InvalidCommonName { cn, .. } => cn,
        }
    }
}

/// A single resource that could not be brought to its desired state. The
/// target is left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("write failed for {path}: {reason}")]
pub struct WriteFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// The trust-store rebuild did not complete. Files on disk already reflect
/// the desired state; the next run retries the rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebuildFailure {
    #[error("{command} exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("{command} timed out after {timeout_ms}ms")]
    TimedOut { command: String, timeout_ms: u64 },

    #[error("failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("{command} not run: {reason}")]
    LockUnavailable { command: String, reason: String },
}

impl RebuildFailure {
    /// Every rebuild failure is safe to retry by re-running convergence.
    pub fn is_retryable(&self) -> bool {
        true
    }
}
