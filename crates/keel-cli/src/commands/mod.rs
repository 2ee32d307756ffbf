//! CLI commands

use std::path::Path;
use std::sync::Arc;

use keel_common::{ClientFactory, ClusterSpec, ManagementCluster};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::{Error, Result};

pub mod apply;
pub mod delete;
pub mod move_cluster;

/// Everything a command needs besides its own arguments
pub struct Context {
    pub settings: Settings,
    pub factory: Arc<dyn ClientFactory>,
    pub cancel: CancellationToken,
}

/// Read and parse a multi-document cluster spec
pub fn load_spec(path: &Path) -> Result<ClusterSpec> {
    let manifests = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
    let spec = ClusterSpec::from_yaml(&manifests)?;
    debug!(
        path = %path.display(),
        cluster = %spec.name(),
        children = spec.children.len(),
        "Loaded cluster spec"
    );
    Ok(spec)
}

/// Management cluster reached through `kubeconfig`, named after the file
pub fn management_cluster(kubeconfig: &Path) -> ManagementCluster {
    let name = kubeconfig
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "management".to_string());
    ManagementCluster::new(name, kubeconfig)
}

/// Token cancelled on the first Ctrl-C. The running attempt finishes; no
/// further retries are started.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current attempt");
            cancel.cancel();
        }
    });
    token
}
