//! Planned filesystem artifacts.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::desired::CommonName;

pub const KEY_MODE: u32 = 0o440;
pub const CERT_MODE: u32 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Key,
    Cert,
    TrustedCert,
}

impl ResourceKind {
    fn id_prefix(self) -> &'static str {
        match self {
            ResourceKind::Key => "x509_keys",
            ResourceKind::Cert => "x509_certs",
            ResourceKind::TrustedCert => "x509_trusted",
        }
    }
}

/// SHA-256 of a content blob, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        ContentHash(hex::encode(Sha256::digest(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file that must exist with exactly this content and metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct FileResource {
    pub cn: CommonName,
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub mode: u32,
    /// Owning group by name; `None` leaves the group untouched.
    pub group: Option<String>,
    pub content: Vec<u8>,
}

impl FileResource {
    /// Stable identity, e.g. `x509_keys_a.example.com`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.kind.id_prefix(), self.cn)
    }

    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(&self.content)
    }
}

impl fmt::Debug for FileResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileResource")
            .field("id", &self.id())
            .field("path", &self.path)
            .field("mode", &format_args!("{:04o}", self.mode))
            .field("group", &self.group)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .finish()
    }
}
