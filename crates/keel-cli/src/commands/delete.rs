//! Delete command - remove a cluster from its management cluster
//!
//! Usage: keel delete --kubeconfig <path> --spec <cluster.yaml>

use std::path::PathBuf;

use clap::Args;
use keel_clustermanager::Deleter;
use tracing::info;

use super::{load_spec, management_cluster, Context};
use crate::Result;

/// Delete a cluster's root object
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Kubeconfig of the management cluster
    #[arg(short = 'k', long)]
    pub kubeconfig: PathBuf,

    /// Cluster spec manifests (multi-document YAML)
    #[arg(short = 'f', long)]
    pub spec: PathBuf,
}

pub async fn run(args: DeleteArgs, ctx: &Context) -> Result<()> {
    let spec = load_spec(&args.spec)?;
    let management = management_cluster(&args.kubeconfig);

    Deleter::new(ctx.factory.clone(), ctx.settings.deleter.clone())
        .with_cancellation(ctx.cancel.clone())
        .run(&spec, &management)
        .await?;

    info!(cluster = %spec.name(), "Cluster deletion requested");
    Ok(())
}
