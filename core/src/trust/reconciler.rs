//! Trusted-certificate reconciliation.
//!
//! Decides which CA certs must be present in the trust store and whether the
//! OS rebuild has to run. The rebuild re-scans the whole trust directory, so
//! it is requested only when a trusted file's content hash changed or a
//! previously trusted CN went away.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use crate::types::desired::{CommonName, DesiredState};
use crate::types::resource::{ContentHash, FileResource, ResourceKind, CERT_MODE};

use super::locator::TrustStoreLayout;

/// Content hashes of currently trusted certs, keyed by trusted-file path.
pub type PriorTrust = BTreeMap<PathBuf, ContentHash>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPlan {
    /// Trusted copies of every complete CA entry, in CN order.
    pub resources: Vec<FileResource>,
    /// Paths among `resources` whose hash differs from prior state.
    pub changed: Vec<PathBuf>,
    /// Previously trusted files whose CN is no longer a desired CA.
    pub removals: Vec<(CommonName, PathBuf)>,
    pub rebuild_needed: bool,
}

pub fn reconcile(
    desired: &DesiredState,
    layout: &TrustStoreLayout,
    prior: &PriorTrust,
) -> TrustPlan {
    let mut plan = TrustPlan::default();
    let mut retained: BTreeSet<PathBuf> = BTreeSet::new();

    for (cn, entry) in desired.cas() {
        if cn.validate().is_err() {
            continue;
        }
        let path = layout.trusted_path(cn.as_str());
        // An incomplete CA entry keeps its existing trusted file untouched.
        retained.insert(path.clone());
        if entry.check(cn).is_err() {
            continue;
        }

        let resource = FileResource {
            cn: cn.clone(),
            kind: ResourceKind::TrustedCert,
            path: path.clone(),
            mode: CERT_MODE,
            group: None,
            content: entry.cert.clone(),
        };
        if prior.get(&path) != Some(&resource.content_hash()) {
            debug!(cn = %cn, "trusted cert changed");
            plan.changed.push(path);
        }
        plan.resources.push(resource);
    }

    for path in prior.keys() {
        if retained.contains(path) {
            continue;
        }
        let cn = path
            .file_stem()
            .map(|s| CommonName::new(s.to_string_lossy()))
            .unwrap_or_else(|| CommonName::new(path.to_string_lossy()));
        debug!(cn = %cn, "trusted cert no longer desired");
        plan.removals.push((cn, path.clone()));
    }

    plan.rebuild_needed = !plan.changed.is_empty() || !plan.removals.is_empty();
    plan
}
