//! Delete a cluster from its management cluster

use std::sync::Arc;

use keel_common::cluster::ObjectIdentity;
use keel_common::{ClientFactory, ClusterSpec, Error, ManagementCluster, RetryPolicy, Retrier};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DeleterConfig;

/// Deletes the root cluster object. Deletion is fire-and-retry only: callers
/// confirm the cluster is gone if they need to.
pub struct Deleter {
    client_factory: Arc<dyn ClientFactory>,
    config: DeleterConfig,
    cancel: Option<CancellationToken>,
}

impl Deleter {
    /// Create a deleter
    pub fn new(client_factory: Arc<dyn ClientFactory>, config: DeleterConfig) -> Self {
        Self {
            client_factory,
            config,
            cancel: None,
        }
    }

    /// Stop retrying once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Delete the cluster's root object from the management cluster
    pub async fn run(&self, spec: &ClusterSpec, management: &ManagementCluster) -> Result<(), Error> {
        let cluster = spec.cluster_identity()?;
        info!(cluster = %cluster, management = %management.name, "Deleting cluster");

        let mut retrier = Retrier::new(self.config.delete_cluster_timeout)
            .with_policy(RetryPolicy::BackOff(self.config.retry_backoff));
        if let Some(token) = &self.cancel {
            retrier = retrier.with_cancellation(token.clone());
        }

        retrier
            .retry_if(|| self.delete(&cluster, management), Error::is_retryable)
            .await
    }

    async fn delete(&self, cluster: &ObjectIdentity, management: &ManagementCluster) -> Result<(), Error> {
        let client = self
            .client_factory
            .build_client_from_kubeconfig(&management.kubeconfig)
            .await
            .map_err(|e| Error::with_context("building client to delete cluster", e))?;

        client
            .delete(cluster)
            .await
            .map_err(|e| Error::with_context("deleting cluster", e))
    }
}
