//! [`KubeClient`] decorator that retries every call

use std::sync::Arc;

use async_trait::async_trait;
use keel_common::cluster::ObjectIdentity;
use keel_common::{ApplyServerSideOptions, Error, KubeClient, Retrier};
use kube::api::DynamicObject;

/// Runs every call of the wrapped client through a [`Retrier`]
#[derive(Clone)]
pub struct RetryingClient {
    inner: Arc<dyn KubeClient>,
    retrier: Retrier,
}

impl RetryingClient {
    /// Wrap `inner`, retrying each call with `retrier`
    pub fn new(inner: Arc<dyn KubeClient>, retrier: Retrier) -> Self {
        Self { inner, retrier }
    }
}

#[async_trait]
impl KubeClient for RetryingClient {
    async fn get(&self, id: &ObjectIdentity) -> Result<DynamicObject, Error> {
        self.retrier.retry(|| self.inner.get(id)).await
    }

    async fn create(&self, obj: &DynamicObject) -> Result<(), Error> {
        self.retrier.retry(|| self.inner.create(obj)).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<(), Error> {
        self.retrier.retry(|| self.inner.update(obj)).await
    }

    async fn delete(&self, id: &ObjectIdentity) -> Result<(), Error> {
        self.retrier.retry(|| self.inner.delete(id)).await
    }

    async fn apply_server_side(
        &self,
        field_manager: &str,
        obj: &DynamicObject,
        opts: ApplyServerSideOptions,
    ) -> Result<(), Error> {
        self.retrier
            .retry(|| self.inner.apply_server_side(field_manager, obj, opts))
            .await
    }
}
