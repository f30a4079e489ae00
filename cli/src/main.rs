//! x509 CLI, the command-line entry point for certificate deployment.
//!
//! # Usage
//!
//! ```text
//! x509 apply /etc/x509/desired.yaml
//! x509 apply desired.yaml --root /srv/stage --os-family Debian --dry-run
//! x509 layout --os-family RedHat --json
//! ```
//!
//! Exit status: 0 when converged, 2 on partial failure, 1 on fatal error.

mod cli;

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use x509_core::convergence::Operation;
use x509_core::descriptor::Descriptor;
use x509_core::facts::{detect_os_family, OS_RELEASE};
use x509_core::infrastructure::local::LocalFilesystem;
use x509_core::infrastructure::runner::{CommandRunner, ProcessRunner};
use x509_core::infrastructure::Filesystem;
use x509_core::package::ca_package_installed;
use x509_core::types::report::ReportView;
use x509_core::{locate, ConvergeError, ConvergenceReport, Orchestrator};

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli, Arc::new(ProcessRunner)) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("x509: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn filesystem(root: Option<&Path>) -> LocalFilesystem {
    match root {
        Some(root) => LocalFilesystem::rooted(root),
        None => LocalFilesystem::new(),
    }
}

/// Flag, then descriptor, then the host's os-release.
fn resolve_os_family(
    flag: Option<&str>,
    descriptor: Option<&str>,
    fs: &dyn Filesystem,
) -> Result<String, ConvergeError> {
    if let Some(family) = flag.or(descriptor) {
        return Ok(family.to_string());
    }
    let path = fs.host_path(Path::new(OS_RELEASE));
    Ok(detect_os_family(&path)?.to_string())
}

fn exit_code(report: &ConvergenceReport) -> i32 {
    if report.partial_failure() {
        2
    } else {
        0
    }
}

fn run(cli: &Cli, runner: Arc<dyn CommandRunner>) -> Result<i32, ConvergeError> {
    let fs = filesystem(cli.root.as_deref());
    match &cli.command {
        Commands::Layout => {
            let family = resolve_os_family(cli.os_family.as_deref(), None, &fs)?;
            let layout = locate(&family)?;
            if cli.json {
                println!("{}", to_json(&layout)?);
            } else {
                println!("family:        {}", layout.family);
                println!("shared CA dir: {}", layout.shared_ca_dir.display());
                println!("trusted dir:   {}", layout.trusted_dir.display());
                println!("rebuild:       {}", layout.rebuild_command.display());
            }
            Ok(0)
        }
        Commands::Apply {
            descriptor,
            dry_run,
            skip_package_check,
        } => apply(cli, fs, runner, descriptor, *dry_run, *skip_package_check),
    }
}

fn apply(
    cli: &Cli,
    fs: LocalFilesystem,
    runner: Arc<dyn CommandRunner>,
    descriptor_path: &Path,
    dry_run: bool,
    skip_package_check: bool,
) -> Result<i32, ConvergeError> {
    let descriptor = Descriptor::load(descriptor_path)?;
    let family = resolve_os_family(
        cli.os_family.as_deref(),
        descriptor.os_family.as_deref(),
        &fs,
    )?;
    let layout = locate(&family)?;
    let desired = descriptor.desired_state()?;

    // A rooted run is a sandbox; the host's package database is irrelevant.
    if !skip_package_check && fs.root().is_none() {
        match ca_package_installed(runner.as_ref(), layout.family) {
            Ok(true) => {}
            Ok(false) => warn!("ca-certificates is not installed; the rebuild will likely fail"),
            Err(e) => warn!("could not check for ca-certificates: {}", e),
        }
    }

    let orch = Orchestrator::new(Arc::new(fs), runner, descriptor.options.clone());
    let prior = orch.prior_state(&family)?;

    if dry_run {
        let plan = orch.plan(&desired, &family, &prior)?;
        for op in plan.operations() {
            let verb = match op {
                Operation::Ensure(_) => "ensure",
                Operation::Remove { .. } => "remove",
                Operation::Directory { .. } => "mkdir",
            };
            println!("{:<7} {:<45} {}", verb, op.id(), op.path().display());
        }
        for rejected in &plan.rejected {
            println!("reject  {}", rejected);
        }
        match &plan.rebuild {
            Some(command) => println!("rebuild {}", command.display()),
            None => println!("rebuild not needed"),
        }
        return Ok(0);
    }

    let report = orch.converge(&desired, &family, &prior)?;
    if cli.json {
        println!("{}", to_json(&ReportView::from(&report))?);
    } else {
        for failure in report.write_failures() {
            eprintln!("x509: {}", failure);
        }
        for rejected in &report.rejected {
            eprintln!("x509: rejected {}", rejected);
        }
        println!("{}", report.summary());
    }
    info!(partial_failure = report.partial_failure(), "done");
    Ok(exit_code(&report))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ConvergeError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ConvergeError::Descriptor(format!("cannot render JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use x509_core::infrastructure::runner::MockRunner;

    fn cli_for(root: &Path, command: Commands) -> Cli {
        Cli {
            json: false,
            verbose: false,
            root: Some(root.to_path_buf()),
            os_family: Some("Debian".into()),
            command,
        }
    }

    fn current_group() -> String {
        let out = std::process::Command::new("id").arg("-gn").output().unwrap();
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }

    fn write_descriptor(dir: &Path, ca: bool) -> PathBuf {
        let path = dir.join("desired.yaml");
        let cas = if ca { "[a.example.com]" } else { "[]" };
        std::fs::write(
            &path,
            format!(
                "cns: [a.example.com]\n\
                 keys: {{ a.example.com: K1 }}\n\
                 certs: {{ a.example.com: C1 }}\n\
                 cas: {}\n\
                 options:\n  key_group: {}\n  lock_path: null\n",
                cas,
                current_group()
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn os_family_flag_wins() {
        let fs = LocalFilesystem::new();
        let family = resolve_os_family(Some("RedHat"), Some("Debian"), &fs).unwrap();
        assert_eq!(family, "RedHat");
    }

    #[test]
    fn os_family_detected_from_rooted_os_release() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(root.path().join("etc/os-release"), "ID=fedora\n").unwrap();
        let fs = LocalFilesystem::rooted(root.path());
        assert_eq!(resolve_os_family(None, None, &fs).unwrap(), "RedHat");
    }

    #[test]
    fn apply_converges_under_root() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let descriptor = write_descriptor(work.path(), true);
        let runner = Arc::new(MockRunner::new());
        let cli = cli_for(
            root.path(),
            Commands::Apply {
                descriptor,
                dry_run: false,
                skip_package_check: false,
            },
        );

        assert_eq!(run(&cli, runner.clone()).unwrap(), 0);
        let key = root.path().join("etc/x509/keys/a.example.com.key");
        assert_eq!(std::fs::read(key).unwrap(), b"K1");
        let trusted = root
            .path()
            .join("usr/local/share/ca-certificates/trusted/a.example.com.crt");
        assert_eq!(std::fs::read(trusted).unwrap(), b"C1");
        assert_eq!(
            runner.executed_commands(),
            vec!["/usr/bin/update-ca-certificates"]
        );

        assert_eq!(run(&cli, runner.clone()).unwrap(), 0);
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let descriptor = write_descriptor(work.path(), true);
        let runner = Arc::new(MockRunner::new());
        let cli = cli_for(
            root.path(),
            Commands::Apply {
                descriptor,
                dry_run: true,
                skip_package_check: true,
            },
        );
        assert_eq!(run(&cli, runner.clone()).unwrap(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn unsupported_family_is_fatal() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let descriptor = write_descriptor(work.path(), false);
        let mut cli = cli_for(
            root.path(),
            Commands::Apply {
                descriptor,
                dry_run: false,
                skip_package_check: true,
            },
        );
        cli.os_family = Some("Haiku".into());
        let err = run(&cli, Arc::new(MockRunner::new())).unwrap_err();
        assert!(matches!(err, ConvergeError::UnsupportedOsFamily(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_rebuild_exits_with_partial_failure() {
        use x509_core::infrastructure::runner::CommandOutput;
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let descriptor = write_descriptor(work.path(), true);
        let runner = Arc::new(MockRunner::with_responses(vec![Ok(CommandOutput::failed(
            1, "boom",
        ))]));
        let cli = cli_for(
            root.path(),
            Commands::Apply {
                descriptor,
                dry_run: false,
                skip_package_check: true,
            },
        );
        assert_eq!(run(&cli, runner).unwrap(), 2);
    }

    #[test]
    fn layout_prints_for_known_family() {
        let root = TempDir::new().unwrap();
        let cli = cli_for(root.path(), Commands::Layout);
        assert_eq!(run(&cli, Arc::new(MockRunner::new())).unwrap(), 0);
    }

    #[test]
    fn cli_parses_apply_flags() {
        let cli = Cli::try_parse_from([
            "x509",
            "apply",
            "desired.yaml",
            "--dry-run",
            "--os-family",
            "RedHat",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.os_family.as_deref(), Some("RedHat"));
        match cli.command {
            Commands::Apply {
                descriptor,
                dry_run,
                ..
            } => {
                assert_eq!(descriptor, PathBuf::from("desired.yaml"));
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
