//! Host adapters for the convergence engine.
//!
//! The `Filesystem` and `CommandRunner` traits are the only way the engine
//! touches the host. `LocalFilesystem`/`ProcessRunner` are the production
//! implementations; `MockFilesystem`/`MockRunner` are test doubles that keep
//! state in memory and record what was asked of them.

pub mod local;
pub mod lock;
pub mod mock;
pub mod runner;

use std::io;
use std::path::{Path, PathBuf};

/// Observed state of a regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub content: Vec<u8>,
    /// Permission bits only (`0o7777` mask).
    pub mode: u32,
    pub gid: u32,
}

/// Filesystem operations the engine needs. Implementations must be shareable
/// across apply workers.
pub trait Filesystem: Send + Sync {
    /// Read a file's content and metadata; `None` if it does not exist.
    fn inspect(&self, path: &Path) -> io::Result<Option<FileState>>;

    /// Replace `path` so that it has exactly this content, mode and group.
    /// Either the whole change lands or the old file is left untouched.
    /// Missing parent directories are created.
    fn write_atomic(&self, path: &Path, content: &[u8], mode: u32, gid: Option<u32>)
        -> io::Result<()>;

    /// Correct mode and group of an existing file without rewriting it.
    fn set_metadata(&self, path: &Path, mode: u32, gid: Option<u32>) -> io::Result<()>;

    /// Remove a file. Returns `false` if it was already absent.
    fn remove(&self, path: &Path) -> io::Result<bool>;

    /// File names directly inside `dir`; empty if `dir` does not exist.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Create `dir` and its parents. Returns `true` if anything was created.
    fn ensure_dir(&self, dir: &Path) -> io::Result<bool>;

    /// Resolve a group name to its gid.
    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>>;

    /// Where a logical path lives on the real host.
    fn host_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::local::LocalFilesystem;
    use super::mock::MockFilesystem;
    use super::*;

    #[test]
    fn implementations_are_trait_objects() {
        let mock = MockFilesystem::new();
        let local = LocalFilesystem::new();
        let _: &dyn Filesystem = &mock;
        let _: &dyn Filesystem = &local;
    }
}
