//! Move command - hand a cluster over to another management cluster
//!
//! Usage: keel move --from-kubeconfig <path> --to-kubeconfig <path> --spec <cluster.yaml>
//!
//! The cluster is left paused in the source. Resuming reconciliation in the
//! target is up to the caller once the move has been verified.

use std::path::PathBuf;

use clap::Args;
use keel_clustermanager::Mover;
use tracing::info;

use super::{load_spec, management_cluster, Context};
use crate::{Error, Result};

/// Move a cluster between management clusters
#[derive(Args, Debug)]
pub struct MoveArgs {
    /// Kubeconfig of the management cluster currently owning the cluster
    #[arg(long)]
    pub from_kubeconfig: PathBuf,

    /// Kubeconfig of the management cluster taking over
    #[arg(long)]
    pub to_kubeconfig: PathBuf,

    /// Cluster spec manifests (multi-document YAML)
    #[arg(short = 'f', long)]
    pub spec: PathBuf,
}

pub async fn run(args: MoveArgs, ctx: &Context) -> Result<()> {
    if args.from_kubeconfig == args.to_kubeconfig {
        return Err(Error::validation(
            "--from-kubeconfig and --to-kubeconfig point to the same file",
        ));
    }

    let spec = load_spec(&args.spec)?;
    let from = management_cluster(&args.from_kubeconfig);
    let to = management_cluster(&args.to_kubeconfig);

    Mover::new(ctx.factory.clone(), ctx.settings.mover.clone())
        .with_cancellation(ctx.cancel.clone())
        .run(&spec, &from, &to)
        .await?;

    info!(cluster = %spec.name(), from = %from.name, to = %to.name, "Cluster moved");
    Ok(())
}
