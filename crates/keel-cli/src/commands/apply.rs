//! Apply command - create or upgrade a cluster
//!
//! Usage: keel apply --kubeconfig <path> --spec <cluster.yaml>

use std::path::PathBuf;

use clap::Args;
use keel_clustermanager::Applier;
use tracing::info;

use super::{load_spec, management_cluster, Context};
use crate::Result;

/// Apply a cluster spec and wait until it is reconciled
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Kubeconfig of the management cluster
    #[arg(short = 'k', long)]
    pub kubeconfig: PathBuf,

    /// Cluster spec manifests (multi-document YAML)
    #[arg(short = 'f', long)]
    pub spec: PathBuf,
}

pub async fn run(args: ApplyArgs, ctx: &Context) -> Result<()> {
    let spec = load_spec(&args.spec)?;
    let management = management_cluster(&args.kubeconfig);

    Applier::new(ctx.factory.clone(), ctx.settings.applier.clone())
        .with_cancellation(ctx.cancel.clone())
        .run(&spec, &management)
        .await?;

    info!(cluster = %spec.name(), management = %management.name, "Cluster is ready");
    Ok(())
}
