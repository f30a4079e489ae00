//! Key/cert resource planner.
//!
//! Stateless: turns desired state into the two file resources every CN needs.
//! It never touches the filesystem.

use crate::error::PlanError;
use crate::types::config::ConvergeOptions;
use crate::types::desired::DesiredState;
use crate::types::resource::{FileResource, ResourceKind, CERT_MODE, KEY_MODE};

/// Planned key/cert resources plus the CNs that could not be planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub resources: Vec<FileResource>,
    pub rejected: Vec<PlanError>,
}

/// Emit a key and a cert resource for every complete entry, in CN order.
///
/// Incomplete entries are rejected individually; the rest still plan.
pub fn plan(desired: &DesiredState, options: &ConvergeOptions) -> Plan {
    let mut out = Plan::default();

    for (cn, entry) in desired.iter() {
        if let Err(e) = entry.check(cn) {
            out.rejected.push(e);
            continue;
        }

        out.resources.push(FileResource {
            cn: cn.clone(),
            kind: ResourceKind::Key,
            path: options.key_root.join(format!("{}.key", cn)),
            mode: KEY_MODE,
            group: Some(options.key_group.clone()),
            content: entry.key.clone(),
        });
        out.resources.push(FileResource {
            cn: cn.clone(),
            kind: ResourceKind::Cert,
            path: options.cert_root.join(format!("{}.crt", cn)),
            mode: CERT_MODE,
            group: None,
            content: entry.cert.clone(),
        });
    }

    out
}
