//! CA bundle package preflight.
//!
//! Installing packages is left to the host's package manager; this only
//! checks that the trust-store tooling is present before converging.

use std::time::Duration;

use tracing::debug;

use crate::infrastructure::runner::CommandRunner;
use crate::trust::locator::OsFamily;

pub const CA_PACKAGE: &str = "ca-certificates";

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// The package-database query for `package` on `family`.
pub fn query_command(family: OsFamily, package: &str) -> (&'static str, Vec<String>) {
    match family {
        OsFamily::Debian => (
            "dpkg-query",
            vec!["-W".into(), "-f=${Status}".into(), package.into()],
        ),
        OsFamily::RedHat => ("rpm", vec!["-q".into(), package.into()]),
    }
}

/// Whether the CA bundle package is installed.
pub fn ca_package_installed(runner: &dyn CommandRunner, family: OsFamily) -> Result<bool, String> {
    let (program, args) = query_command(family, CA_PACKAGE);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = runner
        .run(program, &args, QUERY_TIMEOUT)
        .map_err(|e| format!("{} query failed: {:?}", program, e))?;
    debug!(program, status = out.status, "package query");
    let installed = match family {
        OsFamily::Debian => out.success() && out.stdout.contains("install ok installed"),
        OsFamily::RedHat => out.success(),
    };
    Ok(installed)
}
