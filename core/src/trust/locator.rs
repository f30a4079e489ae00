//! Trust-store layout lookup by OS family.
//!
//! OS differences are data: each supported family maps to one constant
//! layout and nothing downstream branches on the family.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    Debian,
    RedHat,
}

impl OsFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            OsFamily::Debian => "Debian",
            OsFamily::RedHat => "RedHat",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debian" => Ok(OsFamily::Debian),
            "redhat" => Ok(OsFamily::RedHat),
            _ => Err(ConvergeError::UnsupportedOsFamily(s.to_string())),
        }
    }
}

/// Where CA certificates live for one OS family and how to rebuild the
/// consolidated bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustStoreLayout {
    pub family: OsFamily,
    pub shared_ca_dir: PathBuf,
    pub trusted_dir: PathBuf,
    pub rebuild_command: PathBuf,
}

impl TrustStoreLayout {
    /// Path of the trusted copy of `cn`'s certificate.
    pub fn trusted_path(&self, cn: &str) -> PathBuf {
        self.trusted_dir.join(format!("{}.crt", cn))
    }
}

/// Resolve the layout for an OS family name such as `"Debian"`.
pub fn locate(os_family: &str) -> Result<TrustStoreLayout, ConvergeError> {
    Ok(layout_for(os_family.parse()?))
}

pub fn layout_for(family: OsFamily) -> TrustStoreLayout {
    match family {
        OsFamily::Debian => TrustStoreLayout {
            family,
            shared_ca_dir: PathBuf::from("/usr/local/share/ca-certificates"),
            trusted_dir: PathBuf::from("/usr/local/share/ca-certificates/trusted"),
            rebuild_command: PathBuf::from("/usr/bin/update-ca-certificates"),
        },
        OsFamily::RedHat => TrustStoreLayout {
            family,
            shared_ca_dir: PathBuf::from("/etc/pki/ca-trust/source/anchors"),
            trusted_dir: PathBuf::from("/etc/pki/ca-trust/source/"),
            rebuild_command: PathBuf::from("/usr/bin/update-ca-trust"),
        },
    }
}
