//! Keel CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keel_common::telemetry::{init_logging, LogConfig};
use keel_common::{ClientFactory, KubeconfigClientFactory};
use tokio_util::sync::CancellationToken;

use crate::commands::Context;
use crate::config::{Settings, SETTINGS_ENV};

/// Keel - create, upgrade, delete and move workload clusters
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file with timeouts and backoffs
    #[arg(long, global = true, env = SETTINGS_ENV)]
    pub config: Option<PathBuf>,

    /// Retry and wait without any time limit
    #[arg(long, global = true)]
    pub no_timeouts: bool,

    /// Seconds to wait between retries
    #[arg(long, global = true)]
    pub retry_backoff_secs: Option<u64>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or upgrade a cluster and wait until it is ready
    Apply(commands::apply::ApplyArgs),
    /// Delete a cluster
    Delete(commands::delete::DeleteArgs),
    /// Move a cluster to another management cluster
    Move(commands::move_cluster::MoveArgs),
}

impl Cli {
    /// Settings file merged with command line overrides
    pub fn settings(&self) -> Result<Settings> {
        let settings = Settings::load(self.config.as_deref())?;
        Ok(settings.with_overrides(
            self.no_timeouts,
            self.retry_backoff_secs.map(Duration::from_secs),
        ))
    }

    /// Install logging, then run the CLI command against real clusters
    pub async fn run(self) -> Result<()> {
        init_logging(LogConfig {
            json: self.log_json,
            default_filter: None,
        })?;

        let factory: Arc<dyn ClientFactory> = Arc::new(KubeconfigClientFactory);
        let cancel = commands::cancel_on_ctrl_c();
        self.run_with(factory, cancel).await
    }

    /// Run the CLI command with the given client factory
    pub async fn run_with(
        self,
        factory: Arc<dyn ClientFactory>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let ctx = Context {
            settings: self.settings()?,
            factory,
            cancel,
        };
        match self.command {
            Commands::Apply(args) => commands::apply::run(args, &ctx).await,
            Commands::Delete(args) => commands::delete::run(args, &ctx).await,
            Commands::Move(args) => commands::move_cluster::run(args, &ctx).await,
        }
    }
}
