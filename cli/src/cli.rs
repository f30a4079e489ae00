use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "x509", version, about = "Deploy X.509 keys and certs and sync the CA trust store")]
pub struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    #[arg(short, long, global = true, help = "Log at debug level")]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        env = "X509_ROOT",
        help = "Prefix every managed path with this directory"
    )]
    pub root: Option<PathBuf>,
    #[arg(long, global = true, help = "OS family (Debian, RedHat); detected when omitted")]
    pub os_family: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converge the host to a desired-state descriptor.
    Apply {
        descriptor: PathBuf,
        #[arg(long, help = "Print the plan without changing anything")]
        dry_run: bool,
        #[arg(long, help = "Skip the ca-certificates package check")]
        skip_package_check: bool,
    },
    /// Show the trust-store layout for the OS family.
    Layout,
}
