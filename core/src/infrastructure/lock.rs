//! Host-wide exclusive lock around the trust-store rebuild.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::ConvergeError;

/// File-lock guard that releases the lock on drop.
#[derive(Debug)]
pub struct RebuildLock {
    file: File,
    path: PathBuf,
}

impl RebuildLock {
    /// Acquire an exclusive `flock` on `path`, polling until `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<RebuildLock, ConvergeError> {
        let lock_err = |reason: String| ConvergeError::Lock {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| lock_err(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_err(e.to_string()))?;

        let fd = file.as_raw_fd();
        let deadline = Instant::now() + timeout;
        loop {
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                return Ok(RebuildLock {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(lock_err(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        // Lock file stays; waiters may already have it open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trust.lock");
        let held = RebuildLock::acquire(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(held.path(), path.as_path());

        let err = RebuildLock::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, ConvergeError::Lock { .. }));
    }

    #[test]
    fn lock_is_reusable_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/lock/trust.lock");
        drop(RebuildLock::acquire(&path, Duration::from_millis(100)).unwrap());
        assert!(RebuildLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }
}
