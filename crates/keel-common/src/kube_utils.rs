//! Kubernetes utilities: client construction, API resource resolution and
//! mapping of API status codes onto keel errors.

use std::path::Path;
use std::time::Duration;

use kube::api::GroupVersionKind;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};

use crate::cluster::ObjectIdentity;
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from a kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: &Path) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from a kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: &Path,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|e| {
        Error::ClientBuild(format!(
            "failed to read kubeconfig {}: {}",
            kubeconfig.display(),
            e
        ))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::ClientBuild(format!("failed to load kubeconfig: {}", e)))?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config)
        .map_err(|e| Error::ClientBuild(format!("failed to create client: {}", e)))
}

/// Parse an API version string into (group, version)
///
/// Core resources ("v1") have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource for an object identity, deriving the plural from
/// the kind
pub fn api_resource(identity: &ObjectIdentity) -> ApiResource {
    let (group, version) = identity.group_version();
    ApiResource::from_gvk(&GroupVersionKind::gvk(&group, &version, &identity.kind))
}

/// Map a kube error for `identity` onto keel's error type.
///
/// 404 and 409 become [`Error::NotFound`] and [`Error::AlreadyExists`] so
/// callers can match on them without inspecting HTTP codes.
pub fn map_kube_error(identity: &ObjectIdentity, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ref api_err) if api_err.code == 404 => Error::NotFound {
            kind: identity.kind.clone(),
            name: identity.name.clone(),
        },
        kube::Error::Api(ref api_err) if api_err.code == 409 => Error::AlreadyExists {
            kind: identity.kind.clone(),
            name: identity.name.clone(),
        },
        other => Error::Kube { source: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("cluster.x-k8s.io/v1beta1"),
            ("cluster.x-k8s.io".to_string(), "v1beta1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn test_api_resource_plural() {
        let id = ObjectIdentity::new("anywhere.eks.amazonaws.com/v1alpha1", "Cluster", "ns", "c");
        let ar = api_resource(&id);
        assert_eq!(ar.group, "anywhere.eks.amazonaws.com");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.kind, "Cluster");
        assert_eq!(ar.plural, "clusters");

        let id = ObjectIdentity::new(
            "anywhere.eks.amazonaws.com/v1alpha1",
            "VSphereMachineConfig",
            "ns",
            "m",
        );
        assert_eq!(api_resource(&id).plural, "vspheremachineconfigs");
    }

    #[test]
    fn test_map_kube_error() {
        let id = ObjectIdentity::new("v1", "ConfigMap", "ns", "cm");

        assert!(map_kube_error(&id, api_error(404)).is_not_found());
        assert!(map_kube_error(&id, api_error(409)).is_already_exists());
        assert!(matches!(
            map_kube_error(&id, api_error(500)),
            Error::Kube { .. }
        ));
    }

    #[tokio::test]
    async fn test_create_client_missing_kubeconfig() {
        let err = create_client(Path::new("/nonexistent/kubeconfig"))
            .await
            .err()
            .expect("missing kubeconfig should fail");
        assert!(matches!(err, Error::ClientBuild(_)));
        assert!(err.to_string().contains("failed to read kubeconfig"));
    }
}
