//! # start-sandbox
//!
//! Starts an Aztec sandbox the way the test suite's global setup does and keeps it running until
//! SIGINT or SIGTERM, which stop it and exit with status 0. A failed setup exits with status 1.

use std::path::PathBuf;

use clap::Parser;
use sandbox_harness::{HarnessConfig, HarnessError, init_tracing, setup};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "start-sandbox")]
#[command(about = "Start an Aztec sandbox and keep it running until interrupted")]
struct Cli {
    /// Verbosity level (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Harness configuration file (JSON).
    #[arg(short, long, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Expected aztec CLI version, overrides the config file.
    #[arg(long, env = "AZTEC_VERSION")]
    aztec_version: Option<String>,

    /// Do not compare the installed CLI version.
    #[arg(long)]
    skip_version_check: bool,

    /// PXE endpoint used for the health check.
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose.saturating_add(1));

    if let Err(err) = run(cli).await {
        error!(error = %err, "setup failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), HarnessError> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if cli.verbose > 0 {
        config.verbose = true;
    }
    if let Some(version) = cli.aztec_version {
        config.aztec_version = Some(version);
    }
    if cli.skip_version_check {
        config.aztec_version = None;
    }
    if let Some(url) = cli.url {
        config.sandbox.url = url;
    }

    let manager = setup(&config).await?;
    info!(url = %manager.config().url, "sandbox running, press Ctrl-C to stop");

    // The signal listener stops the manager and exits the process
    std::future::pending::<()>().await;
    Ok(())
}
