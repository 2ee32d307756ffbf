//! Condition polling on the root cluster object
//!
//! Controllers converge a cluster asynchronously, so readiness is observed by
//! re-fetching the object until a predicate holds. A single observation is
//! not trusted: the predicate must hold for `total_checks` consecutive polls
//! before the wait succeeds, which filters out conditions that flap while a
//! controller is still rolling changes out.

use std::sync::atomic::{AtomicU32, Ordering};

use kube::api::DynamicObject;
use tracing::debug;

use crate::client::KubeClient;
use crate::cluster::{
    failure_message, find_condition, generation, has_condition, observed_generation, ObjectIdentity,
};
use crate::retry::{retry_once_or, Retrier};
use crate::Error;

/// A fact about a freshly fetched cluster object
pub trait ClusterPredicate: Send + Sync {
    /// Ok when the fact holds, otherwise an error describing what is missing
    fn check(&self, cluster: &DynamicObject) -> Result<(), Error>;
}

impl<F> ClusterPredicate for F
where
    F: Fn(&DynamicObject) -> Result<(), Error> + Send + Sync,
{
    fn check(&self, cluster: &DynamicObject) -> Result<(), Error> {
        self(cluster)
    }
}

/// Holds while the cluster reports no failure message
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFailureMessage;

impl ClusterPredicate for NoFailureMessage {
    fn check(&self, cluster: &DynamicObject) -> Result<(), Error> {
        match failure_message(cluster) {
            Some(msg) => Err(Error::condition(format!("cluster has an error: {}", msg))),
            None => Ok(()),
        }
    }
}

/// Holds once the named status condition is "True"
#[derive(Clone, Debug)]
pub struct ConditionTrue(pub String);

impl ConditionTrue {
    /// Predicate for the given condition type
    pub fn new(condition_type: impl Into<String>) -> Self {
        Self(condition_type.into())
    }
}

impl ClusterPredicate for ConditionTrue {
    fn check(&self, cluster: &DynamicObject) -> Result<(), Error> {
        let condition_type = &self.0;
        if has_condition(cluster, condition_type) {
            return Ok(());
        }
        let Some(condition) = find_condition(cluster, condition_type) else {
            return Err(Error::condition(format!(
                "cluster doesn't yet have condition {}",
                condition_type
            )));
        };

        let status = condition
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or_default();
        let message = condition
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        Err(Error::condition(format!(
            "cluster condition {} is {}: {}",
            condition_type, status, message
        )))
    }
}

/// Poll the cluster until `condition_type` is "True" on `total_checks`
/// consecutive observations.
pub async fn wait_for_condition(
    client: &dyn KubeClient,
    cluster: &ObjectIdentity,
    total_checks: u32,
    retrier: Option<&Retrier>,
    condition_type: &str,
) -> Result<(), Error> {
    wait_for(
        client,
        cluster,
        total_checks,
        retrier,
        &ConditionTrue::new(condition_type),
    )
    .await
}

/// Poll the cluster until `predicate` holds on `total_checks` consecutive
/// observations.
///
/// Every attempt fetches the object fresh. An observation only counts once
/// the controller has caught up with the latest generation; a failing
/// predicate resets the count. Time and attempt bounds come from `retrier`;
/// without one the cluster is checked exactly once.
pub async fn wait_for(
    client: &dyn KubeClient,
    cluster: &ObjectIdentity,
    total_checks: u32,
    retrier: Option<&Retrier>,
    predicate: &dyn ClusterPredicate,
) -> Result<(), Error> {
    let id = &cluster.clone().in_default_namespace();

    let consecutive = AtomicU32::new(0);
    let consecutive = &consecutive;

    retry_once_or(retrier, || async move {
        let current = client.get(id).await?;

        if let Some(observed) = observed_generation(&current) {
            let generation = generation(&current).unwrap_or_default();
            if observed != generation {
                consecutive.store(0, Ordering::SeqCst);
                return Err(Error::condition(format!(
                    "cluster generation ({}) and observedGeneration ({}) differ",
                    generation, observed
                )));
            }
        }

        if let Err(e) = predicate.check(&current) {
            consecutive.store(0, Ordering::SeqCst);
            return Err(e);
        }

        let seen = consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if seen < total_checks {
            debug!(cluster = %id, seen, total_checks, "Cluster condition met, confirming");
            return Err(Error::condition(format!(
                "cluster has reached to expected condition in {}/{} times",
                seen, total_checks
            )));
        }

        Ok(())
    })
    .await
}
