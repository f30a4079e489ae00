//! In-memory filesystem for testing.
//!
//! Tracks files by logical path, records every mutating operation, and can be
//! told to fail or stall on specific paths so partial-failure and timeout
//! handling can be exercised deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::{FileState, Filesystem};

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, FileState>,
    dirs: HashSet<PathBuf>,
    /// Mutating operations in the order they happened, e.g. `write:/a`.
    ops: Vec<String>,
}

/// A test-double filesystem keyed by logical path.
#[derive(Debug, Default)]
pub struct MockFilesystem {
    state: Mutex<MockState>,
    groups: HashMap<String, u32>,
    failing: HashSet<PathBuf>,
    stalled: HashMap<PathBuf, Duration>,
    default_gid: u32,
}

impl MockFilesystem {
    pub fn new() -> Self {
        MockFilesystem::default()
    }

    /// Register a group in the mock group database.
    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        self.groups.insert(name.to_string(), gid);
        self
    }

    /// Make every write, metadata change or removal of `path` fail.
    pub fn fail_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Make writes to `path` sleep before completing.
    pub fn stall_on(mut self, path: impl Into<PathBuf>, delay: Duration) -> Self {
        self.stalled.insert(path.into(), delay);
        self
    }

    /// Seed a file without recording an operation.
    pub fn put(&self, path: impl Into<PathBuf>, content: &[u8], mode: u32, gid: u32) {
        self.lock().files.insert(
            path.into(),
            FileState {
                content: content.to_vec(),
                mode,
                gid,
            },
        );
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<FileState> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    pub fn has_dir(&self, dir: impl AsRef<Path>) -> bool {
        self.lock().dirs.contains(dir.as_ref())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self, path: &Path) -> io::Result<()> {
        if self.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("mock: write to {} denied", path.display()),
            ));
        }
        Ok(())
    }
}

impl Filesystem for MockFilesystem {
    fn inspect(&self, path: &Path) -> io::Result<Option<FileState>> {
        Ok(self.lock().files.get(path).cloned())
    }

    fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        mode: u32,
        gid: Option<u32>,
    ) -> io::Result<()> {
        if let Some(delay) = self.stalled.get(path) {
            std::thread::sleep(*delay);
        }
        self.check_failure(path)?;
        let mut state = self.lock();
        let gid = gid
            .or_else(|| state.files.get(path).map(|f| f.gid))
            .unwrap_or(self.default_gid);
        if let Some(parent) = path.parent() {
            state.dirs.insert(parent.to_path_buf());
        }
        state.files.insert(
            path.to_path_buf(),
            FileState {
                content: content.to_vec(),
                mode,
                gid,
            },
        );
        state.ops.push(format!("write:{}", path.display()));
        Ok(())
    }

    fn set_metadata(&self, path: &Path, mode: u32, gid: Option<u32>) -> io::Result<()> {
        self.check_failure(path)?;
        let mut state = self.lock();
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "mock: no such file"))?;
        file.mode = mode;
        if let Some(gid) = gid {
            file.gid = gid;
        }
        state.ops.push(format!("chmod:{}", path.display()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<bool> {
        self.check_failure(path)?;
        let mut state = self.lock();
        let existed = state.files.remove(path).is_some();
        if existed {
            state.ops.push(format!("remove:{}", path.display()));
        }
        Ok(existed)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn ensure_dir(&self, dir: &Path) -> io::Result<bool> {
        self.check_failure(dir)?;
        let mut state = self.lock();
        let created = state.dirs.insert(dir.to_path_buf());
        if created {
            state.ops.push(format!("mkdir:{}", dir.display()));
        }
        Ok(created)
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.groups.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes() {
        let fs = MockFilesystem::new();
        fs.write_atomic(Path::new("/a/b.crt"), b"C", 0o444, None).unwrap();
        assert_eq!(fs.ops(), vec!["write:/a/b.crt"]);
        assert_eq!(fs.file("/a/b.crt").unwrap().content, b"C");
        assert!(fs.has_dir("/a"));
    }

    #[test]
    fn seeded_files_are_not_ops() {
        let fs = MockFilesystem::new();
        fs.put("/a.crt", b"C", 0o444, 0);
        assert!(fs.ops().is_empty());
        assert!(fs.inspect(Path::new("/a.crt")).unwrap().is_some());
    }

    #[test]
    fn failing_path_leaves_file_untouched() {
        let fs = MockFilesystem::new().fail_on("/a.crt");
        fs.put("/a.crt", b"old", 0o444, 0);
        assert!(fs.write_atomic(Path::new("/a.crt"), b"new", 0o444, None).is_err());
        assert_eq!(fs.file("/a.crt").unwrap().content, b"old");
    }

    #[test]
    fn list_dir_returns_direct_children() {
        let fs = MockFilesystem::new();
        fs.put("/t/a.crt", b"A", 0o444, 0);
        fs.put("/t/sub/b.crt", b"B", 0o444, 0);
        assert_eq!(fs.list_dir(Path::new("/t")).unwrap(), vec!["a.crt"]);
    }

    #[test]
    fn groups_resolve() {
        let fs = MockFilesystem::new().with_group("x509", 990);
        assert_eq!(fs.lookup_group("x509").unwrap(), Some(990));
        assert_eq!(fs.lookup_group("wheel").unwrap(), None);
    }
}
