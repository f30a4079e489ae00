//! Convergence engine: plans file resources from desired state and applies
//! them, then brings the trust store in line.
//!
//! The `planner` derives key and cert resources, the `executor` applies
//! operations idempotently across workers, and the `orchestrator` sequences
//! both with trust-store reconciliation and the rebuild.

pub mod executor;
pub mod orchestrator;
pub mod planner;

use std::path::PathBuf;

use crate::error::PlanError;
use crate::types::desired::CommonName;
use crate::types::resource::FileResource;

/// One step of a convergence plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Make the file match the resource exactly.
    Ensure(FileResource),
    /// Delete a trusted cert that is no longer desired.
    Remove { cn: CommonName, path: PathBuf },
    /// Make sure a trust-store directory exists.
    Directory { id: String, path: PathBuf },
}

impl Operation {
    pub fn id(&self) -> String {
        match self {
            Operation::Ensure(res) => res.id(),
            Operation::Remove { cn, .. } => format!("x509_trusted_{}", cn),
            Operation::Directory { id, .. } => id.clone(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Operation::Ensure(res) => &res.path,
            Operation::Remove { path, .. } => path,
            Operation::Directory { path, .. } => path,
        }
    }
}

/// Everything one run will do, in order: key/cert files, then trust-store
/// files, then at most one rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergencePlan {
    pub file_ops: Vec<Operation>,
    pub trust_ops: Vec<Operation>,
    pub rejected: Vec<PlanError>,
    /// Rebuild command to run after all writes, if the trusted set changed.
    pub rebuild: Option<PathBuf>,
}

impl ConvergencePlan {
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.file_ops.iter().chain(self.trust_ops.iter())
    }
}
