//! Prior trust-store state, re-derived from the filesystem at run start.
//!
//! A trusted file counts as ours only when its CN also has a managed cert
//! under the cert root and both files hold the same bytes. On RedHat the
//! trusted directory is shared with the distribution, so a same-named file
//! we never wrote must not be mistaken for one of ours. Anything that fails
//! the check is never hashed, so it can never be scheduled for removal.

use std::path::Path;

use tracing::debug;

use crate::error::ConvergeError;
use crate::infrastructure::Filesystem;
use crate::types::resource::ContentHash;

use super::locator::TrustStoreLayout;
use super::reconciler::PriorTrust;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConvergeError + '_ {
    move |source| ConvergeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Hash every managed trusted cert currently on disk.
pub fn scan(
    fs: &dyn Filesystem,
    layout: &TrustStoreLayout,
    cert_root: &Path,
) -> Result<PriorTrust, ConvergeError> {
    let mut prior = PriorTrust::new();
    let names = fs
        .list_dir(&layout.trusted_dir)
        .map_err(io_err(&layout.trusted_dir))?;

    for name in names {
        let Some(cn) = name.strip_suffix(".crt") else {
            continue;
        };
        if cn.is_empty() {
            continue;
        }
        let managed = cert_root.join(&name);
        let Some(cert) = fs.inspect(&managed).map_err(io_err(&managed))? else {
            continue;
        };
        let path = layout.trusted_path(cn);
        match fs.inspect(&path).map_err(io_err(&path))? {
            Some(state) if state.content == cert.content => {
                prior.insert(path, ContentHash::of(&state.content));
            }
            Some(_) => {
                debug!(path = %path.display(), "trusted file differs from managed cert; skipped")
            }
            None => {}
        }
    }

    debug!(count = prior.len(), "scanned trusted certs");
    Ok(prior)
}

/// Whether a previous run wrote new trusted files but did not finish the
/// rebuild.
pub fn rebuild_pending(fs: &dyn Filesystem, marker: &Path) -> Result<bool, ConvergeError> {
    Ok(fs.inspect(marker).map_err(io_err(marker))?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockFilesystem;
    use crate::trust::locator::{layout_for, OsFamily};
    use std::path::PathBuf;

    #[test]
    fn only_managed_certs_are_scanned() {
        let fs = MockFilesystem::new();
        let layout = layout_for(OsFamily::RedHat);
        fs.put("/etc/x509/certs/ours.crt", b"C1", 0o444, 0);
        fs.put("/etc/pki/ca-trust/source/ours.crt", b"C1", 0o444, 0);
        fs.put("/etc/pki/ca-trust/source/ca-bundle.legacy.crt", b"X", 0o444, 0);
        fs.put("/etc/pki/ca-trust/source/README", b"R", 0o444, 0);

        let prior = scan(&fs, &layout, Path::new("/etc/x509/certs")).unwrap();
        assert_eq!(prior.len(), 1);
        assert_eq!(
            prior.get(&PathBuf::from("/etc/pki/ca-trust/source/ours.crt")),
            Some(&ContentHash::of(b"C1"))
        );
    }

    #[test]
    fn hash_reflects_trusted_copy() {
        let fs = MockFilesystem::new();
        let layout = layout_for(OsFamily::Debian);
        fs.put("/etc/x509/certs/a.crt", b"C1", 0o444, 0);
        fs.put("/usr/local/share/ca-certificates/trusted/a.crt", b"C1", 0o444, 0);
        let prior = scan(&fs, &layout, Path::new("/etc/x509/certs")).unwrap();
        assert_eq!(prior.values().next(), Some(&ContentHash::of(b"C1")));
    }

    #[test]
    fn same_named_foreign_anchor_is_not_ours() {
        let fs = MockFilesystem::new();
        let layout = layout_for(OsFamily::RedHat);
        fs.put("/etc/x509/certs/web.crt", b"LEAF", 0o444, 0);
        fs.put("/etc/pki/ca-trust/source/web.crt", b"VENDOR-ANCHOR", 0o444, 0);
        let prior = scan(&fs, &layout, Path::new("/etc/x509/certs")).unwrap();
        assert!(prior.is_empty());
    }

    #[test]
    fn missing_trusted_dir_is_empty() {
        let fs = MockFilesystem::new();
        let prior = scan(&fs, &layout_for(OsFamily::Debian), Path::new("/etc/x509/certs")).unwrap();
        assert!(prior.is_empty());
    }

    #[test]
    fn pending_marker_detected() {
        let fs = MockFilesystem::new();
        let marker = Path::new("/var/lib/x509/rebuild-pending");
        assert!(!rebuild_pending(&fs, marker).unwrap());
        fs.put(marker, b"", 0o644, 0);
        assert!(rebuild_pending(&fs, marker).unwrap());
    }
}
