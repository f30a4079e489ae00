use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a convergence run. Every field has a default, so a
/// descriptor may set only the ones it cares about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvergeOptions {
    pub key_root: PathBuf,
    pub cert_root: PathBuf,
    /// Group that owns every key file.
    pub key_group: String,
    /// Concurrent file applications; 1 applies sequentially.
    pub apply_workers: usize,
    pub write_timeout_ms: u64,
    pub rebuild_timeout_ms: u64,
    /// Exclusive lock held around the rebuild. `None` disables locking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    /// Holds the pending-rebuild marker.
    pub state_dir: PathBuf,
}

impl ConvergeOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_timeout_ms)
    }

    pub fn pending_marker(&self) -> PathBuf {
        self.state_dir.join("rebuild-pending")
    }
}

impl Default for ConvergeOptions {
    fn default() -> Self {
        ConvergeOptions {
            key_root: PathBuf::from("/etc/x509/keys"),
            cert_root: PathBuf::from("/etc/x509/certs"),
            key_group: "x509".into(),
            apply_workers: 4,
            write_timeout_ms: 10_000,
            rebuild_timeout_ms: 120_000,
            lock_path: Some(PathBuf::from("/run/lock/x509-trust.lock")),
            lock_timeout_ms: 30_000,
            state_dir: PathBuf::from("/var/lib/x509"),
        }
    }
}
