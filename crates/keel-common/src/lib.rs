//! Common types for keel: errors, retries, the Kubernetes client seam and
//! condition polling shared by the cluster manager and the CLI.

#![deny(missing_docs)]

pub mod client;
pub mod cluster;
pub mod conditions;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{
    ApplyServerSideOptions, ClientFactory, KubeClient, KubeClientImpl, KubeconfigClientFactory,
};
pub use cluster::{ClusterSpec, ManagementCluster, ObjectIdentity};
pub use error::Error;
pub use retry::{retry_once_or, RetryDecision, RetryPolicy, Retrier};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager identity used for every server-side apply issued by keel
pub const DEFAULT_FIELD_MANAGER: &str = "keel-cli";

/// Annotation telling the cluster controller to stop reconciling an object
pub const PAUSED_ANNOTATION: &str = "anywhere.eks.amazonaws.com/paused";

/// Annotation marking a cluster as being driven by the CLI. Only meaningful
/// while the bootstrap cluster owns the object, so it is cleared on move.
pub const MANAGED_BY_CLI_ANNOTATION: &str = "anywhere.eks.amazonaws.com/managed-by-cli";

/// Condition set once the control plane machines are up and healthy
pub const CONDITION_CONTROL_PLANE_READY: &str = "ControlPlaneReady";
/// Condition set once the default CNI has been installed or upgraded
pub const CONDITION_DEFAULT_CNI_CONFIGURED: &str = "DefaultCNIConfigured";
/// Condition set once every worker node group is ready
pub const CONDITION_WORKERS_READY: &str = "WorkersReady";
/// Overall readiness of the cluster
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
