//! Real filesystem backend, optionally confined under a root prefix.
//!
//! With a root of `/srv/stage`, the logical path `/etc/x509/keys/a.key` maps
//! to `/srv/stage/etc/x509/keys/a.key`. Writes go to a temp file beside the
//! target and are renamed into place once mode and group are set.

use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FileState, Filesystem};

#[derive(Debug, Clone, Default)]
pub struct LocalFilesystem {
    root: Option<PathBuf>,
}

impl LocalFilesystem {
    pub fn new() -> Self {
        LocalFilesystem { root: None }
    }

    /// Confine every path under `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        LocalFilesystem {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
            None => path.to_path_buf(),
        }
    }
}

fn temp_path_for(target: &Path) -> io::Result<PathBuf> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
    })?;
    let name = target
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    Ok(parent.join(format!(
        ".{}.tmp-{}",
        name.to_string_lossy(),
        std::process::id()
    )))
}

fn apply_metadata(path: &Path, mode: u32, gid: Option<u32>) -> io::Result<()> {
    if gid.is_some() {
        std::os::unix::fs::chown(path, None, gid)?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

impl Filesystem for LocalFilesystem {
    fn inspect(&self, path: &Path) -> io::Result<Option<FileState>> {
        let real = self.resolve(path);
        let meta = match fs::metadata(&real) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a regular file", real.display()),
            ));
        }
        let content = fs::read(&real)?;
        Ok(Some(FileState {
            content,
            mode: meta.permissions().mode() & 0o7777,
            gid: meta.gid(),
        }))
    }

    fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        mode: u32,
        gid: Option<u32>,
    ) -> io::Result<()> {
        let real = self.resolve(path);
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path_for(&real)?;

        // Start owner-only so key bytes are never exposed under a looser mode.
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
            drop(file);
            apply_metadata(&tmp, mode, gid)?;
            fs::rename(&tmp, &real)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            debug!(path = %real.display(), bytes = content.len(), "wrote file");
        }
        result
    }

    fn set_metadata(&self, path: &Path, mode: u32, gid: Option<u32>) -> io::Result<()> {
        apply_metadata(&self.resolve(path), mode, gid)
    }

    fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(self.resolve(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_dir(&self, dir: &Path) -> io::Result<bool> {
        let real = self.resolve(dir);
        if real.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&real)?;
        Ok(true)
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        lookup_gid(name)
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.resolve(path)
    }
}

/// Look up a group in the host's group database.
pub fn lookup_gid(name: &str) -> io::Result<Option<u32>> {
    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "group name contains NUL"))?;
    let mut buf_len = 4096usize;
    loop {
        let mut buf = vec![0 as libc::c_char; buf_len];
        let mut group: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let ret = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                &mut group,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if ret == libc::ERANGE && buf_len < 1 << 20 {
            buf_len *= 2;
            continue;
        }
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        if result.is_null() {
            return Ok(None);
        }
        return Ok(Some(group.gr_gid));
    }
}
