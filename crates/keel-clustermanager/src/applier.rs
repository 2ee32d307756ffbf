//! Apply a cluster spec and wait for it to be fully reconciled

use std::sync::Arc;

use keel_common::cluster::ObjectIdentity;
use keel_common::conditions::{wait_for, wait_for_condition, NoFailureMessage};
use keel_common::{
    ApplyServerSideOptions, ClientFactory, ClusterSpec, Error, KubeClient, ManagementCluster,
    RetryPolicy, Retrier, CONDITION_CONTROL_PLANE_READY, CONDITION_DEFAULT_CNI_CONFIGURED,
    CONDITION_READY, CONDITION_WORKERS_READY, DEFAULT_FIELD_MANAGER,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ApplierConfig;

/// Applies the cluster spec to the management cluster and waits until the
/// changes are fully reconciled.
///
/// The apply is retried as a unit, client build included: a client can only
/// fail to build on a transient API server error, which is exactly what the
/// apply retries protect against.
pub struct Applier {
    client_factory: Arc<dyn ClientFactory>,
    config: ApplierConfig,
    cancel: Option<CancellationToken>,
}

impl Applier {
    /// Create an applier
    pub fn new(client_factory: Arc<dyn ClientFactory>, config: ApplierConfig) -> Self {
        Self {
            client_factory,
            config,
            cancel: None,
        }
    }

    /// Stop retrying and waiting once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The applier's configuration
    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    /// Apply the cluster's objects in the management cluster and wait for
    /// the cluster to become ready.
    pub async fn run(&self, spec: &ClusterSpec, management: &ManagementCluster) -> Result<(), Error> {
        let cluster = spec.cluster_identity()?;
        info!(cluster = %cluster, management = %management.name, "Applying cluster spec");

        let client = self
            .retrier(self.config.apply_cluster_timeout)
            .retry_if(|| self.apply(spec, management), Error::is_retryable)
            .await?;

        // Every condition wait below draws from the budget anchored here
        let wait_start = Instant::now();
        let total = self.config.condition_check_total_count;

        wait_for(
            client.as_ref(),
            &cluster,
            total,
            Some(&self.retrier_for_failure_message()),
            &NoFailureMessage,
        )
        .await
        .map_err(|e| Error::ClusterValidation(e.to_string()))?;

        info!(cluster = %cluster, "Waiting for control plane to be ready");
        self.wait_for(
            client.as_ref(),
            &cluster,
            wait_start,
            CONDITION_CONTROL_PLANE_READY,
            "waiting for cluster's control plane to be ready",
        )
        .await?;

        if spec.is_cni_managed() {
            info!(cluster = %cluster, "Waiting for default CNI to be updated");
            self.wait_for(
                client.as_ref(),
                &cluster,
                wait_start,
                CONDITION_DEFAULT_CNI_CONFIGURED,
                "waiting for cluster's CNI to be configured",
            )
            .await?;
        }

        info!(cluster = %cluster, "Waiting for worker nodes to be ready");
        self.wait_for(
            client.as_ref(),
            &cluster,
            wait_start,
            CONDITION_WORKERS_READY,
            "waiting for cluster's workers to be ready",
        )
        .await?;

        info!(cluster = %cluster, "Waiting for cluster changes to be completed");
        self.wait_for(
            client.as_ref(),
            &cluster,
            wait_start,
            CONDITION_READY,
            "waiting for cluster to be ready",
        )
        .await?;

        info!(
            cluster = %cluster,
            elapsed_secs = wait_start.elapsed().as_secs(),
            "Cluster reconciled"
        );
        Ok(())
    }

    /// Retrier for one condition wait, bounded by what is left of the
    /// reconcile budget since `wait_start`.
    pub fn retrier_for_wait(&self, wait_start: Instant) -> Retrier {
        let remaining = self
            .config
            .wait_for_cluster_reconcile
            .saturating_sub(wait_start.elapsed());
        self.retrier(remaining)
    }

    fn retrier_for_failure_message(&self) -> Retrier {
        self.retrier(self.config.wait_for_failure_message)
    }

    fn retrier(&self, timeout: std::time::Duration) -> Retrier {
        let retrier =
            Retrier::new(timeout).with_policy(RetryPolicy::BackOff(self.config.retry_backoff));
        match &self.cancel {
            Some(token) => retrier.with_cancellation(token.clone()),
            None => retrier,
        }
    }

    async fn apply(
        &self,
        spec: &ClusterSpec,
        management: &ManagementCluster,
    ) -> Result<Arc<dyn KubeClient>, Error> {
        let client = self
            .client_factory
            .build_client_from_kubeconfig(&management.kubeconfig)
            .await
            .map_err(|e| Error::with_context("building client to apply cluster spec changes", e))?;

        let opts = ApplyServerSideOptions {
            force_ownership: true,
        };
        for obj in spec.cluster_and_children() {
            client
                .apply_server_side(DEFAULT_FIELD_MANAGER, obj, opts)
                .await
                .map_err(|e| Error::with_context("applying cluster spec", e))?;
        }
        debug!(objects = spec.children.len() + 1, "Applied cluster spec");

        Ok(client)
    }

    async fn wait_for(
        &self,
        client: &dyn KubeClient,
        cluster: &ObjectIdentity,
        wait_start: Instant,
        condition_type: &str,
        context: &str,
    ) -> Result<(), Error> {
        let retrier = self.retrier_for_wait(wait_start);
        debug!(
            condition = condition_type,
            remaining_secs = retrier.timeout().as_secs(),
            "Waiting for condition"
        );
        wait_for_condition(
            client,
            cluster,
            self.config.condition_check_total_count,
            Some(&retrier),
            condition_type,
        )
        .await
        .map_err(|e| Error::with_context(context, e))
    }
}
