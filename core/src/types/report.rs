//! Outcome of a convergence run.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{PlanError, RebuildFailure, WriteFailure};

/// What happened to a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    /// Content, mode or group differed and were corrected.
    Updated,
    Unchanged,
    Removed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyRecord {
    pub id: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebuildOutcome {
    NotNeeded,
    Succeeded { command: String },
    Failed {
        #[serde(flatten)]
        failure: RebuildFailure,
        retryable: bool,
    },
}

impl RebuildOutcome {
    pub fn ran(&self) -> bool {
        !matches!(self, RebuildOutcome::NotNeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceReport {
    pub os_family: String,
    pub records: Vec<ApplyRecord>,
    pub rejected: Vec<PlanError>,
    pub rebuild: RebuildOutcome,
}

impl ConvergenceReport {
    fn count(&self, pred: impl Fn(&ApplyOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| *o == ApplyOutcome::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| *o == ApplyOutcome::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| *o == ApplyOutcome::Unchanged)
    }

    pub fn removed(&self) -> usize {
        self.count(|o| *o == ApplyOutcome::Removed)
    }

    /// Number of writes and removals actually performed.
    pub fn changes(&self) -> usize {
        self.created() + self.updated() + self.removed()
    }

    pub fn write_failures(&self) -> Vec<WriteFailure> {
        self.records
            .iter()
            .filter_map(|r| match &r.outcome {
                ApplyOutcome::Failed { reason } => Some(WriteFailure {
                    path: r.path.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn rebuild_ran(&self) -> bool {
        self.rebuild.ran()
    }

    /// True when any CN was rejected or any write or the rebuild failed.
    pub fn partial_failure(&self) -> bool {
        !self.rejected.is_empty()
            || self
                .records
                .iter()
                .any(|r| matches!(r.outcome, ApplyOutcome::Failed { .. }))
            || matches!(self.rebuild, RebuildOutcome::Failed { .. })
    }

    /// A one-line human summary.
    pub fn summary(&self) -> String {
        let rebuild = match &self.rebuild {
            RebuildOutcome::NotNeeded => "not needed".to_string(),
            RebuildOutcome::Succeeded { .. } => "ran".to_string(),
            RebuildOutcome::Failed { failure, .. } => format!("failed ({})", failure),
        };
        format!(
            "{} created, {} updated, {} unchanged, {} removed, {} failed, {} rejected; rebuild {}",
            self.created(),
            self.updated(),
            self.unchanged(),
            self.removed(),
            self.write_failures().len(),
            self.rejected.len(),
            rebuild
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ReportCounts {
    created: usize,
    updated: usize,
    unchanged: usize,
    removed: usize,
}

/// JSON form of the report, with counts precomputed for consumers.
#[derive(Debug, Serialize)]
pub struct ReportView<'a> {
    #[serde(flatten)]
    report: &'a ConvergenceReport,
    counts: ReportCounts,
    partial_failure: bool,
}

impl<'a> From<&'a ConvergenceReport> for ReportView<'a> {
    fn from(report: &'a ConvergenceReport) -> Self {
        ReportView {
            report,
            counts: ReportCounts {
                created: report.created(),
                updated: report.updated(),
                unchanged: report.unchanged(),
                removed: report.removed(),
            },
            partial_failure: report.partial_failure(),
        }
    }
}
