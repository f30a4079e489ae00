//! X.509 deployment core.
//!
//! Converges a host towards a declared set of certificate/key pairs and keeps
//! the system CA trust store in sync with the subset of certificates flagged
//! as CAs. The engine is split plan/apply:
//!
//! - `convergence::planner` derives key and cert file resources,
//! - `trust` locates the OS trust-store layout and reconciles trusted certs,
//! - `convergence::orchestrator` applies everything and decides the rebuild.
//!
//! Host side effects go through the `infrastructure` traits so the engine can
//! run against an in-memory filesystem and a recording command runner.

pub mod convergence;
pub mod descriptor;
pub mod error;
pub mod facts;
pub mod infrastructure;
pub mod package;
pub mod trust;
pub mod types;

pub use convergence::orchestrator::Orchestrator;
pub use error::{ConvergeError, PlanError, RebuildFailure, WriteFailure};
pub use trust::locator::{locate, OsFamily, TrustStoreLayout};
pub use types::config::ConvergeOptions;
pub use types::desired::{CommonName, DesiredState, Entry};
pub use types::report::ConvergenceReport;
pub use types::resource::{ContentHash, FileResource, ResourceKind};
