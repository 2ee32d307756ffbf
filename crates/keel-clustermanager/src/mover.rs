//! Move a cluster's objects from one management cluster to another
//!
//! The source copy is paused before anything is written to the target so
//! the source controller stops reconciling (and can't delete external
//! resources) while ownership changes hands. Creates tolerate objects that
//! already exist, which makes a retried or re-run move idempotent.

use std::sync::Arc;

use keel_common::cluster::{remove_annotation, set_annotation, ObjectIdentity};
use keel_common::{
    ClientFactory, ClusterSpec, Error, KubeClient, ManagementCluster, RetryPolicy, Retrier,
    MANAGED_BY_CLI_ANNOTATION, PAUSED_ANNOTATION,
};
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MoverConfig;

/// Relocates a cluster's root object and children between management
/// clusters.
pub struct Mover {
    client_factory: Arc<dyn ClientFactory>,
    config: MoverConfig,
    cancel: Option<CancellationToken>,
}

impl Mover {
    /// Create a mover
    pub fn new(client_factory: Arc<dyn ClientFactory>, config: MoverConfig) -> Self {
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

    /// Move the cluster from `from` to `to`, retrying the whole sequence
    pub async fn run(
        &self,
        spec: &ClusterSpec,
        from: &ManagementCluster,
        to: &ManagementCluster,
    ) -> Result<(), Error> {
        info!(
            cluster = %spec.name(),
            from = %from.name,
            to = %to.name,
            "Moving cluster"
        );

        let mut retrier = Retrier::new(self.config.move_cluster_timeout)
            .with_policy(RetryPolicy::BackOff(self.config.retry_backoff));
        if let Some(token) = &self.cancel {
            retrier = retrier.with_cancellation(token.clone());
        }

        retrier
            .retry_if(|| self.move_cluster(spec, from, to), Error::is_retryable)
            .await?;
        info!(cluster = %spec.name(), to = %to.name, "Cluster moved");
        Ok(())
    }

    async fn move_cluster(
        &self,
        spec: &ClusterSpec,
        from: &ManagementCluster,
        to: &ManagementCluster,
    ) -> Result<(), Error> {
        let source = self.build_client(from).await?;
        let target = self.build_client(to).await?;

        move_cluster_object(source.as_ref(), target.as_ref(), spec).await?;

        for child in &spec.children {
            let id = ObjectIdentity::from_object(child)?;
            move_child_object(source.as_ref(), target.as_ref(), &id)
                .await
                .map_err(|e| Error::with_context(format!("moving child object {}", id), e))?;
        }

        Ok(())
    }

    async fn build_client(&self, cluster: &ManagementCluster) -> Result<Arc<dyn KubeClient>, Error> {
        self.client_factory
            .build_client_from_kubeconfig(&cluster.kubeconfig)
            .await
            .map_err(|e| Error::with_context("building client to move cluster", e))
    }
}

async fn move_cluster_object(
    source: &dyn KubeClient,
    target: &dyn KubeClient,
    spec: &ClusterSpec,
) -> Result<(), Error> {
    let id = spec.cluster_identity()?;
    let mut cluster = source
        .get(&id)
        .await
        .map_err(|e| Error::with_context("reading cluster from source", e))?;

    // Pause before anything lands in the target
    set_annotation(&mut cluster, PAUSED_ANNOTATION, "true");
    remove_annotation(&mut cluster, MANAGED_BY_CLI_ANNOTATION);
    source
        .update(&cluster)
        .await
        .map_err(|e| Error::with_context("updating paused cluster in source", e))?;
    debug!(cluster = %id, "Paused cluster in source");

    clear_server_fields(&mut cluster);
    create_if_missing(target, &cluster)
        .await
        .map_err(|e| Error::with_context("creating cluster in target", e))
}

async fn move_child_object(
    source: &dyn KubeClient,
    target: &dyn KubeClient,
    id: &ObjectIdentity,
) -> Result<(), Error> {
    let mut obj = source.get(id).await?;
    clear_server_fields(&mut obj);
    // Owners get new UIDs in the target
    obj.metadata.owner_references = None;
    create_if_missing(target, &obj).await
}

fn clear_server_fields(obj: &mut DynamicObject) {
    obj.metadata.resource_version = None;
    obj.metadata.uid = None;
}

async fn create_if_missing(client: &dyn KubeClient, obj: &DynamicObject) -> Result<(), Error> {
    match client.create(obj).await {
        Err(e) if e.is_already_exists() => {
            debug!(object = ?obj.metadata.name, "Object already exists in target");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use keel_common::testing::{
        cluster_object, object, InMemoryClient, Operation, StaticClientFactory, TEST_API_VERSION,
    };
    use std::time::Duration;

    struct Fixture {
        source: Arc<InMemoryClient>,
        target: Arc<InMemoryClient>,
        factory: Arc<StaticClientFactory>,
        spec: ClusterSpec,
    }

    fn machine_config() -> DynamicObject {
        object(TEST_API_VERSION, "VSphereMachineConfig", "default", "prod-cp")
    }

    fn fixture() -> Fixture {
        let source = Arc::new(InMemoryClient::new());
        let target = Arc::new(InMemoryClient::new());
        let factory = StaticClientFactory::new()
            .with_client("/bootstrap", source.clone() as Arc<dyn KubeClient>)
            .with_client("/mgmt", target.clone() as Arc<dyn KubeClient>);

        let mut cluster = cluster_object("prod", "default");
        set_annotation(&mut cluster, MANAGED_BY_CLI_ANNOTATION, "true");
        cluster.metadata.uid = Some("source-uid".to_string());
        cluster.metadata.resource_version = Some("42".to_string());
        source.insert(cluster.clone());

        let mut child = machine_config();
        child.metadata.uid = Some("child-uid".to_string());
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: TEST_API_VERSION.to_string(),
            kind: "Cluster".to_string(),
            name: "prod".to_string(),
            uid: "source-uid".to_string(),
            ..Default::default()
        }]);
        source.insert(child);

        Fixture {
            source,
            target,
            factory: Arc::new(factory),
            spec: ClusterSpec::new(cluster, vec![machine_config()]),
        }
    }

    fn bootstrap() -> ManagementCluster {
        ManagementCluster::new("bootstrap", "/bootstrap")
    }

    fn management() -> ManagementCluster {
        ManagementCluster::new("mgmt", "/mgmt")
    }

    fn config() -> MoverConfig {
        MoverConfig {
            move_cluster_timeout: Duration::ZERO,
            retry_backoff: Duration::ZERO,
        }
    }

    fn cluster_id() -> ObjectIdentity {
        ObjectIdentity::new(TEST_API_VERSION, "Cluster", "default", "prod")
    }

    #[tokio::test]
    async fn moves_root_and_children() {
        let f = fixture();
        Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap();

        let source_cluster = f.source.object(&cluster_id()).unwrap();
        let annotations = source_cluster.metadata.annotations.unwrap();
        assert_eq!(annotations[PAUSED_ANNOTATION], "true");
        assert!(!annotations.contains_key(MANAGED_BY_CLI_ANNOTATION));

        assert_eq!(f.target.len(), 2);
        let created: Vec<DynamicObject> = f
            .target
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Create)
            .filter_map(|c| c.object)
            .collect();
        assert_eq!(created.len(), 2);
        for obj in &created {
            assert!(obj.metadata.uid.is_none());
            assert!(obj.metadata.resource_version.is_none());
        }
        assert!(created[1].metadata.owner_references.is_none());
    }

    /// Story: the pause marker is written before any copy lands in the
    /// target, and the root lands before its children
    #[tokio::test]
    async fn story_pause_happens_before_copy() {
        let f = fixture();
        Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap();

        let pause = f
            .source
            .calls()
            .iter()
            .find(|c| c.operation == Operation::Update)
            .and_then(|c| c.object.clone())
            .unwrap();
        assert_eq!(
            pause.metadata.annotations.unwrap()[PAUSED_ANNOTATION],
            "true"
        );

        let target_calls = f.target.calls();
        let targets: Vec<String> = target_calls
            .iter()
            .map(|c| c.identity.to_string())
            .collect();
        assert_eq!(
            targets,
            vec!["Cluster/default/prod", "VSphereMachineConfig/default/prod-cp"]
        );

        // The copy was taken from the paused object
        let copied = target_calls[0].object.clone().unwrap();
        assert_eq!(
            copied.metadata.annotations.unwrap()[PAUSED_ANNOTATION],
            "true"
        );
        assert_eq!(f.source.count(Operation::Update), 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let f = fixture();
        let mover = Mover::new(f.factory.clone(), config());

        mover.run(&f.spec, &bootstrap(), &management()).await.unwrap();
        mover.run(&f.spec, &bootstrap(), &management()).await.unwrap();

        assert_eq!(f.target.len(), 2);
        assert_eq!(f.target.count(Operation::Create), 4);
    }

    #[tokio::test]
    async fn error_building_client() {
        let f = fixture();
        f.factory.fail_next(1, "bad client");

        let err = Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("building client to move cluster"));
        assert!(f.target.calls().is_empty());
    }

    #[tokio::test]
    async fn error_reading_cluster() {
        let f = fixture();
        f.source.fail_next(Operation::Get, 1, "timeout");

        let err = Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("reading cluster from source"));
    }

    #[tokio::test]
    async fn error_pausing_writes_nothing_to_target() {
        let f = fixture();
        f.source.fail_next(Operation::Update, 1, "conflict");

        let err = Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("updating paused cluster in source"));
        assert!(f.target.calls().is_empty());
    }

    #[tokio::test]
    async fn error_creating_cluster() {
        let f = fixture();
        f.target.fail_next(Operation::Create, 1, "forbidden");

        let err = Mover::new(f.factory.clone(), config())
            .run(&f.spec, &bootstrap(), &management())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("creating cluster in target"));
        assert_eq!(f.target.count(Operation::Create), 1);
    }

    #[tokio::test]
    async fn error_moving_child_names_the_child() {
        let f = fixture();
        let missing = object(TEST_API_VERSION, "VSphereDatacenterConfig", "default", "dc");
        let spec = ClusterSpec::new(f.spec.cluster.clone(), vec![missing]);

        let err = Mover::new(f.factory.clone(), config())
            .run(&spec, &bootstrap(), &management())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("moving child object VSphereDatacenterConfig/default/dc"));
        assert!(err.is_not_found());

        // The pause marker and the root copy survive the failed child
        let source_cluster = f.source.object(&cluster_id()).unwrap();
        assert_eq!(
            source_cluster.metadata.annotations.unwrap()[PAUSED_ANNOTATION],
            "true"
        );
        assert!(f.target.object(&cluster_id()).is_some());
        assert_eq!(f.target.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_child_is_not_retried() {
        let f = fixture();
        let mut child = machine_config();
        child.types = None;
        let spec = ClusterSpec::new(f.spec.cluster.clone(), vec![child]);

        let err = Mover::new(
            f.factory.clone(),
            MoverConfig {
                move_cluster_timeout: Duration::from_secs(30),
                retry_backoff: Duration::from_secs(1),
            },
        )
        .run(&spec, &bootstrap(), &management())
        .await
        .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing apiVersion/kind"));
        assert_eq!(f.source.count(Operation::Update), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_target_failure_is_retried() {
        let f = fixture();
        f.target.fail_next(Operation::Create, 1, "connection reset");

        Mover::new(
            f.factory.clone(),
            MoverConfig {
                move_cluster_timeout: Duration::from_secs(30),
                retry_backoff: Duration::from_secs(1),
            },
        )
        .run(&f.spec, &bootstrap(), &management())
        .await
        .unwrap();

        assert_eq!(f.target.len(), 2);
        assert_eq!(f.source.count(Operation::Update), 2);
    }
}
