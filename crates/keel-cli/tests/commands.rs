//! CLI commands run end-to-end against in-memory management clusters

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use keel_cli::{Cli, Error};
use keel_common::testing::{mark_observed, set_condition, InMemoryClient, Operation, StaticClientFactory};
use keel_common::{KubeClient, ObjectIdentity, PAUSED_ANNOTATION};
use tokio_util::sync::CancellationToken;

const CLUSTER_YAML: &str = r#"
apiVersion: anywhere.eks.amazonaws.com/v1alpha1
kind: Cluster
metadata:
  name: prod
  namespace: default
spec:
  kubernetesVersion: "1.32"
---
apiVersion: anywhere.eks.amazonaws.com/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: prod-cp
  namespace: default
spec:
  numCPUs: 4
"#;

fn spec_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CLUSTER_YAML.as_bytes()).unwrap();
    file
}

fn cluster_id() -> ObjectIdentity {
    ObjectIdentity::new(
        "anywhere.eks.amazonaws.com/v1alpha1",
        "Cluster",
        "default",
        "prod",
    )
}

fn ready_controller(client: &InMemoryClient) {
    client.on_get(|cluster| {
        for condition in ["ControlPlaneReady", "WorkersReady", "Ready"] {
            set_condition(cluster, condition, "True", "");
        }
        mark_observed(cluster);
    });
}

#[tokio::test(start_paused = true)]
async fn apply_command_creates_cluster() {
    let client = Arc::new(InMemoryClient::new());
    ready_controller(&client);
    let factory = StaticClientFactory::new()
        .with_client("/kc/mgmt", client.clone() as Arc<dyn KubeClient>);
    let spec = spec_file();

    let cli = Cli::try_parse_from([
        "keel",
        "apply",
        "--kubeconfig",
        "/kc/mgmt",
        "--spec",
        spec.path().to_str().unwrap(),
    ])
    .unwrap();
    cli.run_with(Arc::new(factory), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.len(), 2);
    assert_eq!(client.count(Operation::Apply), 2);
    let stored = client.object(&cluster_id()).unwrap();
    assert_eq!(stored.data["spec"]["kubernetesVersion"], "1.32");
}

#[tokio::test]
async fn apply_command_reports_unreachable_cluster() {
    let factory = StaticClientFactory::new();
    factory.fail_next(1, "connection refused");
    let spec = spec_file();

    let cli = Cli::try_parse_from([
        "keel",
        "apply",
        "-k",
        "/kc/mgmt",
        "-f",
        spec.path().to_str().unwrap(),
        "--retry-backoff-secs",
        "0",
    ])
    .unwrap();

    // Cancelled up front: one attempt, then the last error
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = cli.run_with(Arc::new(factory), cancel).await.unwrap_err();

    assert!(matches!(err, Error::Keel(_)));
    let msg = err.to_string();
    assert!(msg.contains("building client to apply cluster spec changes"));
    assert!(msg.contains("connection refused"));
}

#[tokio::test]
async fn move_command_pauses_and_copies() {
    let source = Arc::new(InMemoryClient::new());
    let target = Arc::new(InMemoryClient::new());
    let spec = spec_file();
    for obj in keel_common::ClusterSpec::from_yaml(CLUSTER_YAML)
        .unwrap()
        .cluster_and_children()
    {
        source.create(obj).await.unwrap();
    }
    let factory = StaticClientFactory::new()
        .with_client("/kc/bootstrap", source.clone() as Arc<dyn KubeClient>)
        .with_client("/kc/mgmt", target.clone() as Arc<dyn KubeClient>);

    let cli = Cli::try_parse_from([
        "keel",
        "move",
        "--from-kubeconfig",
        "/kc/bootstrap",
        "--to-kubeconfig",
        "/kc/mgmt",
        "-f",
        spec.path().to_str().unwrap(),
    ])
    .unwrap();
    cli.run_with(Arc::new(factory), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(target.len(), 2);
    let paused = source.object(&cluster_id()).unwrap();
    assert_eq!(
        paused.metadata.annotations.unwrap()[PAUSED_ANNOTATION],
        "true"
    );
}

#[tokio::test]
async fn missing_settings_file_is_reported() {
    let cli = Cli::try_parse_from([
        "keel",
        "--config",
        "/nonexistent/keel.yaml",
        "delete",
        "-k",
        "/kc/mgmt",
        "-f",
        "cluster.yaml",
    ])
    .unwrap();

    let err = cli
        .run_with(Arc::new(StaticClientFactory::new()), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadFile { .. }));
}
