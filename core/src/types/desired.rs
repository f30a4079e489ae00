//! Desired state: which certificate/key pairs must exist and which of them
//! are trusted as CAs.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::PlanError;

/// A certificate's identity, typically a DNS name. Used verbatim as the file
/// stem of every artifact derived from the entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommonName(String);

impl CommonName {
    pub fn new(name: impl Into<String>) -> Self {
        CommonName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the name can be used as a single path component.
    pub fn validate(&self) -> Result<(), PlanError> {
        let reason = if self.0.is_empty() {
            Some("empty")
        } else if self.0 == "." || self.0 == ".." {
            Some("reserved path component")
        } else if self.0.contains('/') {
            Some("contains '/'")
        } else if self.0.contains('\0') {
            Some("contains NUL")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(PlanError::InvalidCommonName {
                cn: self.0.clone(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommonName {
    fn from(s: &str) -> Self {
        CommonName(s.to_string())
    }
}

impl From<String> for CommonName {
    fn from(s: String) -> Self {
        CommonName(s)
    }
}

/// Key and cert material for one CN. Both blobs are opaque.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    pub ca: bool,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, cert: impl Into<Vec<u8>>, ca: bool) -> Self {
        Entry {
            key: key.into(),
            cert: cert.into(),
            ca,
        }
    }

    /// Reject entries that cannot produce a complete key/cert pair.
    pub fn check(&self, cn: &CommonName) -> Result<(), PlanError> {
        cn.validate()?;
        let missing = if self.cert.is_empty() {
            Some("cert")
        } else if self.key.is_empty() {
            Some("key")
        } else {
            None
        };
        match missing {
            Some(what) => Err(PlanError::MissingMaterial {
                cn: cn.to_string(),
                what: what.into(),
            }),
            None => Ok(()),
        }
    }
}

// Key bytes never reach logs.
impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("ca", &self.ca)
            .finish()
    }
}

/// Mapping CN -> entry. Ordered by CN so every derived plan is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    entries: BTreeMap<CommonName, Entry>,
}

impl DesiredState {
    pub fn new() -> Self {
        DesiredState::default()
    }

    /// Insert an entry, returning the previous one for the same CN.
    pub fn insert(&mut self, cn: impl Into<CommonName>, entry: Entry) -> Option<Entry> {
        self.entries.insert(cn.into(), entry)
    }

    pub fn get(&self, cn: &str) -> Option<&Entry> {
        self.entries.get(&CommonName::new(cn))
    }

    pub fn contains(&self, cn: &str) -> bool {
        self.get(cn).is_some()
    }

    /// Entries in lexicographic CN order.
    pub fn iter(&self) -> impl Iterator<Item = (&CommonName, &Entry)> {
        self.entries.iter()
    }

    /// Entries flagged as CA, in CN order.
    pub fn cas(&self) -> impl Iterator<Item = (&CommonName, &Entry)> {
        self.entries.iter().filter(|(_, e)| e.ca)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(CommonName, Entry)> for DesiredState {
    fn from_iter<I: IntoIterator<Item = (CommonName, Entry)>>(iter: I) -> Self {
        DesiredState {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_is_sorted_by_cn() {
        let mut state = DesiredState::new();
        state.insert("b.example.com", Entry::new("K2", "C2", false));
        state.insert("a.example.com", Entry::new("K1", "C1", true));
        let names: Vec<&str> = state.iter().map(|(cn, _)| cn.as_str()).collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn cas_filters_flagged_entries() {
        let mut state = DesiredState::new();
        state.insert("leaf", Entry::new("K", "C", false));
        state.insert("root-ca", Entry::new("K", "C", true));
        let cas: Vec<&str> = state.cas().map(|(cn, _)| cn.as_str()).collect();
        assert_eq!(cas, vec!["root-ca"]);
    }

    #[test]
    fn check_rejects_empty_cert_on_ca() {
        let cn = CommonName::new("ca.example.com");
        let err = Entry::new("K", "", true).check(&cn).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingMaterial {
                cn: "ca.example.com".into(),
                what: "cert".into()
            }
        );
    }

    #[test]
    fn check_rejects_empty_key() {
        let cn = CommonName::new("a.example.com");
        let err = Entry::new("", "C", false).check(&cn).unwrap_err();
        assert!(matches!(err, PlanError::MissingMaterial { ref what, .. } if what == "key"));
    }

    #[test]
    fn check_accepts_complete_entry() {
        let cn = CommonName::new("a.example.com");
        assert!(Entry::new("K", "C", false).check(&cn).is_ok());
    }

    #[test]
    fn common_name_rejects_path_components() {
        for bad in ["", ".", "..", "a/b", "../etc/passwd", "nul\0byte"] {
            assert!(CommonName::new(bad).validate().is_err(), "{:?} accepted", bad);
        }
        assert!(CommonName::new("snakeoil.example.com").validate().is_ok());
    }

    #[test]
    fn debug_redacts_key_material() {
        let rendered = format!("{:?}", Entry::new("SECRET", "C", false));
        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("<6 bytes>"));
    }
}
