//! Host facts: which OS family this machine belongs to.

use std::path::Path;

use crate::error::ConvergeError;
use crate::trust::locator::OsFamily;

pub const OS_RELEASE: &str = "/etc/os-release";

const DEBIAN_IDS: &[&str] = &["debian", "ubuntu", "linuxmint", "raspbian"];
const REDHAT_IDS: &[&str] = &["rhel", "centos", "fedora", "rocky", "almalinux", "amzn", "ol"];

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Derive the OS family from `os-release` content (`ID` and `ID_LIKE`).
pub fn family_from_os_release(content: &str) -> Option<OsFamily> {
    let mut ids: Vec<String> = Vec::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ID" | "ID_LIKE" => ids.extend(
                unquote(value)
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase()),
            ),
            _ => {}
        }
    }
    ids.iter().find_map(|id| {
        if DEBIAN_IDS.contains(&id.as_str()) {
            Some(OsFamily::Debian)
        } else if REDHAT_IDS.contains(&id.as_str()) {
            Some(OsFamily::RedHat)
        } else {
            None
        }
    })
}

/// Read `os-release` at `path` and map it to a family.
pub fn detect_os_family(path: &Path) -> Result<OsFamily, ConvergeError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConvergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    family_from_os_release(&content).ok_or_else(|| {
        let id = content
            .lines()
            .find_map(|l| l.strip_prefix("ID="))
            .map(|v| unquote(v).to_string())
            .unwrap_or_else(|| "unknown".into());
        ConvergeError::UnsupportedOsFamily(id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubuntu_is_debian() {
        let content = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"24.04\"\n";
        assert_eq!(family_from_os_release(content), Some(OsFamily::Debian));
    }

    #[test]
    fn rocky_is_redhat() {
        let content = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(family_from_os_release(content), Some(OsFamily::RedHat));
    }

    #[test]
    fn derivative_matches_through_id_like() {
        let content = "ID=pop\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(family_from_os_release(content), Some(OsFamily::Debian));
    }

    #[test]
    fn unknown_distribution_is_none() {
        assert_eq!(family_from_os_release("ID=alpine\n"), None);
    }

    #[test]
    fn detect_reports_unsupported_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(&path, "ID=\"arch\"\n").unwrap();
        match detect_os_family(&path) {
            Err(ConvergeError::UnsupportedOsFamily(id)) => assert_eq!(id, "arch"),
            other => panic!("expected UnsupportedOsFamily, got {:?}", other),
        }
    }
}
