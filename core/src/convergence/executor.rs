//! Convergence executor: applies planned operations through a `Filesystem`.
//!
//! Each operation is independent, so a batch of up to `workers` operations
//! runs concurrently. Every operation has its own deadline; one that misses
//! it is reported as failed and the batch moves on. Failures never stop the
//! remaining operations.

use std::collections::BTreeMap;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::infrastructure::Filesystem;
use crate::types::report::{ApplyOutcome, ApplyRecord};
use crate::types::resource::FileResource;

use super::Operation;

/// Group name -> gid, or the reason it could not be resolved.
pub type GroupTable = BTreeMap<String, Result<u32, String>>;

/// Resolve every group named by `ops` once, up front.
pub fn resolve_groups<'a>(
    fs: &dyn Filesystem,
    ops: impl IntoIterator<Item = &'a Operation>,
) -> GroupTable {
    let mut table = GroupTable::new();
    for op in ops {
        let Operation::Ensure(FileResource {
            group: Some(name), ..
        }) = op
        else {
            continue;
        };
        if table.contains_key(name) {
            continue;
        }
        let resolved = match fs.lookup_group(name) {
            Ok(Some(gid)) => Ok(gid),
            Ok(None) => Err(format!("group '{}' does not exist", name)),
            Err(e) => Err(format!("group '{}' lookup failed: {}", name, e)),
        };
        table.insert(name.clone(), resolved);
    }
    table
}

/// Bring one file in line with its resource, touching it only if needed.
fn ensure(fs: &dyn Filesystem, res: &FileResource, gid: Option<u32>) -> io::Result<ApplyOutcome> {
    let current = fs.inspect(&res.path)?;
    match current {
        None => {
            fs.write_atomic(&res.path, &res.content, res.mode, gid)?;
            Ok(ApplyOutcome::Created)
        }
        Some(state) if state.content != res.content => {
            fs.write_atomic(&res.path, &res.content, res.mode, gid)?;
            Ok(ApplyOutcome::Updated)
        }
        Some(state) => {
            let group_differs = gid.is_some_and(|g| g != state.gid);
            if state.mode != res.mode || group_differs {
                fs.set_metadata(&res.path, res.mode, gid)?;
                Ok(ApplyOutcome::Updated)
            } else {
                Ok(ApplyOutcome::Unchanged)
            }
        }
    }
}

/// Apply a single operation, converting every error into a failed outcome.
pub fn apply_operation(fs: &dyn Filesystem, op: &Operation, groups: &GroupTable) -> ApplyOutcome {
    let result = match op {
        Operation::Ensure(res) => {
            let gid = match &res.group {
                None => None,
                Some(name) => match groups.get(name) {
                    Some(Ok(gid)) => Some(*gid),
                    Some(Err(reason)) => {
                        return ApplyOutcome::Failed {
                            reason: reason.clone(),
                        }
                    }
                    None => {
                        return ApplyOutcome::Failed {
                            reason: format!("group '{}' was not resolved", name),
                        }
                    }
                },
            };
            ensure(fs, res, gid)
        }
        Operation::Remove { path, .. } => fs.remove(path).map(|existed| {
            if existed {
                ApplyOutcome::Removed
            } else {
                ApplyOutcome::Unchanged
            }
        }),
        Operation::Directory { path, .. } => fs.ensure_dir(path).map(|created| {
            if created {
                ApplyOutcome::Created
            } else {
                ApplyOutcome::Unchanged
            }
        }),
    };
    result.unwrap_or_else(|e| ApplyOutcome::Failed {
        reason: e.to_string(),
    })
}

/// Applies batches of operations with bounded concurrency and per-operation
/// timeouts.
pub struct ConvergenceExecutor {
    fs: Arc<dyn Filesystem>,
    workers: usize,
    timeout: Duration,
}

impl ConvergenceExecutor {
    pub fn new(fs: Arc<dyn Filesystem>, workers: usize, timeout: Duration) -> Self {
        ConvergenceExecutor {
            fs,
            workers: workers.max(1),
            timeout,
        }
    }

    /// Apply `ops`, returning one record per operation in input order.
    pub fn execute(&self, ops: &[Operation], groups: &GroupTable) -> Vec<ApplyRecord> {
        let mut outcomes: Vec<Option<ApplyOutcome>> = vec![None; ops.len()];
        let groups = Arc::new(groups.clone());

        for (batch_no, batch) in ops.chunks(self.workers).enumerate() {
            let offset = batch_no * self.workers;
            let (tx, rx) = mpsc::channel();

            for (i, op) in batch.iter().enumerate() {
                let tx = tx.clone();
                let fs = Arc::clone(&self.fs);
                let groups = Arc::clone(&groups);
                let op = op.clone();
                std::thread::spawn(move || {
                    let outcome = apply_operation(fs.as_ref(), &op, &groups);
                    let _ = tx.send((offset + i, outcome));
                });
            }
            drop(tx);

            let deadline = Instant::now() + self.timeout;
            let mut pending = batch.len();
            while pending > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok((idx, outcome)) => {
                        outcomes[idx] = Some(outcome);
                        pending -= 1;
                    }
                    Err(_) => break,
                }
            }
        }

        ops.iter()
            .zip(outcomes)
            .map(|(op, outcome)| {
                let outcome = outcome.unwrap_or_else(|| ApplyOutcome::Failed {
                    reason: format!("timed out after {}ms", self.timeout.as_millis()),
                });
                match &outcome {
                    ApplyOutcome::Failed { reason } => {
                        warn!(id = %op.id(), path = %op.path().display(), %reason, "apply failed")
                    }
                    other => debug!(id = %op.id(), ?other, "applied"),
                }
                ApplyRecord {
                    id: op.id(),
                    path: op.path().clone(),
                    outcome,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockFilesystem;
    use crate::types::desired::CommonName;
    use crate::types::resource::{ResourceKind, CERT_MODE, KEY_MODE};
    use std::path::{Path, PathBuf};

    fn key(cn: &str, content: &str) -> Operation {
        Operation::Ensure(FileResource {
            cn: CommonName::new(cn),
            kind: ResourceKind::Key,
            path: PathBuf::from(format!("/etc/x509/keys/{}.key", cn)),
            mode: KEY_MODE,
            group: Some("x509".into()),
            content: content.as_bytes().to_vec(),
        })
    }

    fn cert(cn: &str, content: &str) -> Operation {
        Operation::Ensure(FileResource {
            cn: CommonName::new(cn),
            kind: ResourceKind::Cert,
            path: PathBuf::from(format!("/etc/x509/certs/{}.crt", cn)),
            mode: CERT_MODE,
            group: None,
            content: content.as_bytes().to_vec(),
        })
    }

    fn executor(fs: MockFilesystem) -> (Arc<MockFilesystem>, ConvergenceExecutor) {
        let fs = Arc::new(fs);
        let exec = ConvergenceExecutor::new(fs.clone(), 4, Duration::from_secs(5));
        (fs, exec)
    }

    #[test]
    fn creates_missing_files() {
        let (fs, exec) = executor(MockFilesystem::new().with_group("x509", 990));
        let ops = vec![key("a", "K1"), cert("a", "C1")];
        let groups = resolve_groups(fs.as_ref(), &ops);
        let records = exec.execute(&ops, &groups);
        assert!(records.iter().all(|r| r.outcome == ApplyOutcome::Created));
        let key_file = fs.file("/etc/x509/keys/a.key").unwrap();
        assert_eq!(key_file.mode, 0o440);
        assert_eq!(key_file.gid, 990);
        assert_eq!(fs.file("/etc/x509/certs/a.crt").unwrap().mode, 0o444);
    }

    #[test]
    fn matching_file_is_not_rewritten() {
        let (fs, exec) = executor(MockFilesystem::new().with_group("x509", 990));
        fs.put("/etc/x509/keys/a.key", b"K1", 0o440, 990);
        let ops = vec![key("a", "K1")];
        let records = exec.execute(&ops, &resolve_groups(fs.as_ref(), &ops));
        assert_eq!(records[0].outcome, ApplyOutcome::Unchanged);
        assert!(fs.ops().is_empty());
    }

    #[test]
    fn metadata_drift_is_fixed_without_rewrite() {
        let (fs, exec) = executor(MockFilesystem::new().with_group("x509", 990));
        fs.put("/etc/x509/keys/a.key", b"K1", 0o644, 0);
        let ops = vec![key("a", "K1")];
        let records = exec.execute(&ops, &resolve_groups(fs.as_ref(), &ops));
        assert_eq!(records[0].outcome, ApplyOutcome::Updated);
        assert_eq!(fs.ops(), vec!["chmod:/etc/x509/keys/a.key"]);
        let file = fs.file("/etc/x509/keys/a.key").unwrap();
        assert_eq!((file.mode, file.gid), (0o440, 990));
    }

    #[test]
    fn content_change_rewrites() {
        let (fs, exec) = executor(MockFilesystem::new());
        fs.put("/etc/x509/certs/a.crt", b"C1", 0o444, 0);
        let ops = vec![cert("a", "C2")];
        let records = exec.execute(&ops, &GroupTable::new());
        assert_eq!(records[0].outcome, ApplyOutcome::Updated);
        assert_eq!(fs.file("/etc/x509/certs/a.crt").unwrap().content, b"C2");
    }

    #[test]
    fn one_failure_does_not_block_others() {
        let (fs, exec) = executor(MockFilesystem::new().fail_on("/etc/x509/certs/bad.crt"));
        let ops = vec![cert("bad", "C"), cert("good", "C")];
        let records = exec.execute(&ops, &GroupTable::new());
        assert!(matches!(records[0].outcome, ApplyOutcome::Failed { .. }));
        assert_eq!(records[1].outcome, ApplyOutcome::Created);
        assert!(fs.file("/etc/x509/certs/good.crt").is_some());
    }

    #[test]
    fn unknown_group_fails_key_only() {
        let (fs, exec) = executor(MockFilesystem::new());
        let ops = vec![key("a", "K1"), cert("a", "C1")];
        let records = exec.execute(&ops, &resolve_groups(fs.as_ref(), &ops));
        match &records[0].outcome {
            ApplyOutcome::Failed { reason } => assert!(reason.contains("x509")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(records[1].outcome, ApplyOutcome::Created);
        assert!(fs.file("/etc/x509/keys/a.key").is_none());
    }

    #[test]
    fn slow_write_times_out() {
        let fs = Arc::new(
            MockFilesystem::new().stall_on("/etc/x509/certs/slow.crt", Duration::from_millis(500)),
        );
        let exec = ConvergenceExecutor::new(fs.clone(), 2, Duration::from_millis(50));
        let ops = vec![cert("slow", "C"), cert("fast", "C")];
        let records = exec.execute(&ops, &GroupTable::new());
        match &records[0].outcome {
            ApplyOutcome::Failed { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(records[1].outcome, ApplyOutcome::Created);
    }

    #[test]
    fn records_keep_input_order_with_many_workers() {
        let (_fs, exec) = executor(MockFilesystem::new());
        let ops: Vec<Operation> = (0..10).map(|i| cert(&format!("cn{}", i), "C")).collect();
        let records = exec.execute(&ops, &GroupTable::new());
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let expected: Vec<String> = ops.iter().map(|o| o.id()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn remove_and_directory_outcomes() {
        let fs = MockFilesystem::new();
        fs.put("/trusted/old.crt", b"C", 0o444, 0);
        let remove = Operation::Remove {
            cn: CommonName::new("old"),
            path: PathBuf::from("/trusted/old.crt"),
        };
        let dir = Operation::Directory {
            id: "x509_shared_ca_certificates_folder".into(),
            path: PathBuf::from("/trusted"),
        };
        let groups = GroupTable::new();
        assert_eq!(apply_operation(&fs, &remove, &groups), ApplyOutcome::Removed);
        assert_eq!(apply_operation(&fs, &remove, &groups), ApplyOutcome::Unchanged);
        assert_eq!(apply_operation(&fs, &dir, &groups), ApplyOutcome::Created);
        assert_eq!(apply_operation(&fs, &dir, &groups), ApplyOutcome::Unchanged);
        assert!(fs.inspect(Path::new("/trusted/old.crt")).unwrap().is_none());
    }
}
