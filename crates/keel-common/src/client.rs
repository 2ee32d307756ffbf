//! Kubernetes client seam used by the cluster manager
//!
//! Provides a trait-based abstraction over the handful of object operations
//! the engine needs, allowing tests to swap in mocks or an in-memory store
//! while production code talks to the API server through kube-rs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::cluster::ObjectIdentity;
use crate::kube_utils::{api_resource, create_client, map_kube_error};
use crate::Error;

/// Options for server-side apply
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyServerSideOptions {
    /// Take ownership of fields currently owned by other managers
    pub force_ownership: bool,
}

/// Object operations against one cluster's API server
///
/// Implementations must report a rejected create of an existing object as
/// [`Error::AlreadyExists`] and a missing object as [`Error::NotFound`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch the current state of an object
    async fn get(&self, id: &ObjectIdentity) -> Result<DynamicObject, Error>;

    /// Create an object
    async fn create(&self, obj: &DynamicObject) -> Result<(), Error>;

    /// Replace an existing object
    async fn update(&self, obj: &DynamicObject) -> Result<(), Error>;

    /// Delete an object
    async fn delete(&self, id: &ObjectIdentity) -> Result<(), Error>;

    /// Server-side apply an object under the given field manager
    async fn apply_server_side(
        &self,
        field_manager: &str,
        obj: &DynamicObject,
        opts: ApplyServerSideOptions,
    ) -> Result<(), Error>;
}

/// Builds clients for a cluster from its kubeconfig
///
/// Building a client may talk to the API server and can fail transiently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build an authenticated client from a kubeconfig file
    async fn build_client_from_kubeconfig(
        &self,
        kubeconfig: &Path,
    ) -> Result<Arc<dyn KubeClient>, Error>;
}

/// Real client implementation using DynamicObject for untyped resources
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, id: &ObjectIdentity) -> Api<DynamicObject> {
        let ar = api_resource(id);
        if id.namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), &id.namespace, &ar)
        }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get(&self, id: &ObjectIdentity) -> Result<DynamicObject, Error> {
        self.api_for(id)
            .get(&id.name)
            .await
            .map_err(|e| map_kube_error(id, e))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        self.api_for(&id)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(&id, e))?;
        debug!(object = %id, "Created object");
        Ok(())
    }

    async fn update(&self, obj: &DynamicObject) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        self.api_for(&id)
            .replace(&id.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(&id, e))?;
        debug!(object = %id, "Updated object");
        Ok(())
    }

    async fn delete(&self, id: &ObjectIdentity) -> Result<(), Error> {
        self.api_for(id)
            .delete(&id.name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(id, e))?;
        debug!(object = %id, "Deleted object");
        Ok(())
    }

    async fn apply_server_side(
        &self,
        field_manager: &str,
        obj: &DynamicObject,
        opts: ApplyServerSideOptions,
    ) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        let mut params = PatchParams::apply(field_manager);
        if opts.force_ownership {
            params = params.force();
        }
        self.api_for(&id)
            .patch(&id.name, &params, &Patch::Apply(obj))
            .await
            .map_err(|e| map_kube_error(&id, e))?;
        debug!(object = %id, field_manager = %field_manager, "Applied object");
        Ok(())
    }
}

/// Production [`ClientFactory`] reading kubeconfig files from disk
#[derive(Clone, Debug, Default)]
pub struct KubeconfigClientFactory;

#[async_trait]
impl ClientFactory for KubeconfigClientFactory {
    async fn build_client_from_kubeconfig(
        &self,
        kubeconfig: &Path,
    ) -> Result<Arc<dyn KubeClient>, Error> {
        let client = create_client(kubeconfig).await?;
        Ok(Arc::new(KubeClientImpl::new(client)))
    }
}
