//! Keel CLI
//!
//! Creates, upgrades, deletes and moves clusters managed from a management
//! cluster.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use keel_cli::{Cli, Error};

#[tokio::main]
async fn main() -> ExitCode {
    match Cli::parse().run().await {
        Ok(()) => ExitCode::SUCCESS,
        // No subscriber of ours is installed to report it
        Err(e @ Error::Telemetry(_)) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
