//! Convergence orchestrator.
//!
//! One run is a single linear pass:
//!
//! 1. resolve the trust-store layout (fails before any write),
//! 2. plan key/cert resources and reconcile trusted certs,
//! 3. apply key/cert files, then trust-store directories and files,
//! 4. run the rebuild at most once, after every write has settled,
//! 5. report.
//!
//! There is no retry loop; re-running converge is the retry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ConvergeError, RebuildFailure};
use crate::infrastructure::lock::RebuildLock;
use crate::infrastructure::runner::{CommandRunner, RunError};
use crate::infrastructure::Filesystem;
use crate::trust::locator::{locate, TrustStoreLayout};
use crate::trust::prior::{self, rebuild_pending};
use crate::trust::reconciler::{reconcile, PriorTrust};
use crate::types::config::ConvergeOptions;
use crate::types::desired::DesiredState;
use crate::types::report::{ApplyOutcome, ConvergenceReport, RebuildOutcome};

use super::executor::{resolve_groups, ConvergenceExecutor};
use super::planner::plan;
use super::{ConvergencePlan, Operation};

pub struct Orchestrator {
    fs: Arc<dyn Filesystem>,
    runner: Arc<dyn CommandRunner>,
    options: ConvergeOptions,
}

impl Orchestrator {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        runner: Arc<dyn CommandRunner>,
        options: ConvergeOptions,
    ) -> Self {
        Orchestrator {
            fs,
            runner,
            options,
        }
    }

    pub fn options(&self) -> &ConvergeOptions {
        &self.options
    }

    /// Hash the managed trusted certs currently on disk.
    pub fn prior_state(&self, os_family: &str) -> Result<PriorTrust, ConvergeError> {
        let layout = locate(os_family)?;
        prior::scan(self.fs.as_ref(), &layout, &self.options.cert_root)
    }

    /// Compute the full plan without changing anything.
    pub fn plan(
        &self,
        desired: &DesiredState,
        os_family: &str,
        prior: &PriorTrust,
    ) -> Result<ConvergencePlan, ConvergeError> {
        let layout = locate(os_family)?;
        self.plan_with_layout(desired, &layout, prior)
    }

    fn plan_with_layout(
        &self,
        desired: &DesiredState,
        layout: &TrustStoreLayout,
        prior: &PriorTrust,
    ) -> Result<ConvergencePlan, ConvergeError> {
        let files = plan(desired, &self.options);
        let trust = reconcile(desired, layout, prior);
        let pending = rebuild_pending(self.fs.as_ref(), &self.options.pending_marker())?;
        if pending {
            info!("previous rebuild did not complete; rebuilding again");
        }

        let mut trust_ops = vec![
            Operation::Directory {
                id: "x509_shared_ca_certificates_folder".into(),
                path: layout.shared_ca_dir.clone(),
            },
            Operation::Directory {
                id: "x509_shared_ca_trust_certificates_folder".into(),
                path: layout.trusted_dir.clone(),
            },
        ];
        trust_ops.extend(trust.resources.into_iter().map(Operation::Ensure));
        trust_ops.extend(
            trust
                .removals
                .into_iter()
                .map(|(cn, path)| Operation::Remove { cn, path }),
        );

        Ok(ConvergencePlan {
            file_ops: files.resources.into_iter().map(Operation::Ensure).collect(),
            trust_ops,
            rejected: files.rejected,
            rebuild: (trust.rebuild_needed || pending).then(|| layout.rebuild_command.clone()),
        })
    }

    /// Converge the host to `desired`, using `prior` as the trusted-cert
    /// state observed at run start.
    pub fn converge(
        &self,
        desired: &DesiredState,
        os_family: &str,
        prior: &PriorTrust,
    ) -> Result<ConvergenceReport, ConvergeError> {
        let layout = locate(os_family)?;
        let plan = self.plan_with_layout(desired, &layout, prior)?;
        for rejected in &plan.rejected {
            warn!(%rejected, "skipping CN");
        }
        info!(
            family = %layout.family,
            cns = desired.len(),
            operations = plan.file_ops.len() + plan.trust_ops.len(),
            rebuild = plan.rebuild.is_some(),
            "converging"
        );

        let groups = resolve_groups(self.fs.as_ref(), plan.operations());
        let executor = ConvergenceExecutor::new(
            Arc::clone(&self.fs),
            self.options.apply_workers,
            self.options.write_timeout(),
        );
        let mut records = executor.execute(&plan.file_ops, &groups);
        let trust_records = executor.execute(&plan.trust_ops, &groups);
        // A timed-out write may still land after the rebuild; keep the
        // marker so the next run rebuilds again.
        let trust_settled = !trust_records
            .iter()
            .any(|r| matches!(r.outcome, ApplyOutcome::Failed { .. }));
        records.extend(trust_records);

        let rebuild = match &plan.rebuild {
            Some(command) => self.rebuild(command, trust_settled),
            None => RebuildOutcome::NotNeeded,
        };

        let report = ConvergenceReport {
            os_family: layout.family.to_string(),
            records,
            rejected: plan.rejected,
            rebuild,
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// Scan prior state from disk, then converge.
    pub fn converge_from_disk(
        &self,
        desired: &DesiredState,
        os_family: &str,
    ) -> Result<ConvergenceReport, ConvergeError> {
        let prior = self.prior_state(os_family)?;
        self.converge(desired, os_family, &prior)
    }

    fn rebuild(&self, command: &Path, trust_settled: bool) -> RebuildOutcome {
        let command_str = command.display().to_string();
        let marker = self.options.pending_marker();
        if let Err(e) = self.fs.write_atomic(&marker, b"", 0o644, None) {
            warn!(marker = %marker.display(), error = %e, "could not record pending rebuild");
        }

        let _lock = match &self.options.lock_path {
            Some(path) => {
                let host_path = self.fs.host_path(path);
                let timeout = Duration::from_millis(self.options.lock_timeout_ms);
                match RebuildLock::acquire(&host_path, timeout) {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        return failed(RebuildFailure::LockUnavailable {
                            command: command_str,
                            reason: e.to_string(),
                        })
                    }
                }
            }
            None => None,
        };

        info!(command = %command_str, "rebuilding trust store");
        let timeout = self.options.rebuild_timeout();
        let failure = match self.runner.run(&command_str, &[], timeout) {
            Ok(out) if out.success() => None,
            Ok(out) => Some(RebuildFailure::NonZeroExit {
                command: command_str.clone(),
                status: out.status,
                stderr: out.stderr.trim().to_string(),
            }),
            Err(RunError::TimedOut) => Some(RebuildFailure::TimedOut {
                command: command_str.clone(),
                timeout_ms: self.options.rebuild_timeout_ms,
            }),
            Err(RunError::Spawn(reason)) => Some(RebuildFailure::Spawn {
                command: command_str.clone(),
                reason,
            }),
        };

        match failure {
            None if !trust_settled => {
                warn!(marker = %marker.display(), "trusted writes failed; rebuild stays pending");
                RebuildOutcome::Succeeded {
                    command: command_str,
                }
            }
            None => {
                if let Err(e) = self.fs.remove(&marker) {
                    warn!(marker = %marker.display(), error = %e, "could not clear pending rebuild");
                }
                RebuildOutcome::Succeeded {
                    command: command_str,
                }
            }
            Some(failure) => failed(failure),
        }
    }
}

fn failed(failure: RebuildFailure) -> RebuildOutcome {
    warn!(%failure, "trust store rebuild failed");
    RebuildOutcome::Failed {
        retryable: failure.is_retryable(),
        failure,
    }
}
