//! Timeouts and backoffs for the cluster operations
//!
//! Durations are read from settings files as whole seconds. `no_timeouts()`
//! lifts every bound for interactive or CI runs where an operation should
//! wait as long as it takes.

use std::time::Duration;

use serde::Deserialize;

/// How long to keep retrying the apply of the cluster objects
pub const DEFAULT_APPLY_CLUSTER_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Total budget for every condition wait after a successful apply
pub const DEFAULT_WAIT_FOR_CLUSTER_RECONCILE: Duration = Duration::from_secs(60 * 60);
/// How long to wait for a failure message to clear
pub const DEFAULT_WAIT_FOR_FAILURE_MESSAGE: Duration = Duration::from_secs(10 * 60);
/// Pause between attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Consecutive observations required before a condition counts as met
pub const DEFAULT_CONDITION_CHECK_TOTAL_COUNT: u32 = 20;
/// How long to keep retrying a cluster delete
pub const DEFAULT_DELETE_CLUSTER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How long to keep retrying a cluster move
pub const DEFAULT_MOVE_CLUSTER_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Configuration for [`crate::Applier`]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplierConfig {
    /// Retry budget for building the client and applying every object
    #[serde(with = "serde_duration")]
    pub apply_cluster_timeout: Duration,
    /// Budget shared by the control plane, CNI, workers and ready waits
    #[serde(with = "serde_duration")]
    pub wait_for_cluster_reconcile: Duration,
    /// Budget for the failure message check
    #[serde(with = "serde_duration")]
    pub wait_for_failure_message: Duration,
    /// Pause between attempts
    #[serde(with = "serde_duration")]
    pub retry_backoff: Duration,
    /// Consecutive successful polls required by each wait
    pub condition_check_total_count: u32,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            apply_cluster_timeout: DEFAULT_APPLY_CLUSTER_TIMEOUT,
            wait_for_cluster_reconcile: DEFAULT_WAIT_FOR_CLUSTER_RECONCILE,
            wait_for_failure_message: DEFAULT_WAIT_FOR_FAILURE_MESSAGE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            condition_check_total_count: DEFAULT_CONDITION_CHECK_TOTAL_COUNT,
        }
    }
}

impl ApplierConfig {
    /// Defaults with every timeout lifted
    pub fn no_timeouts() -> Self {
        Self::default().without_timeouts()
    }

    /// Keep backoff and check count, lift every timeout
    pub fn without_timeouts(self) -> Self {
        Self {
            apply_cluster_timeout: Duration::MAX,
            wait_for_cluster_reconcile: Duration::MAX,
            wait_for_failure_message: Duration::MAX,
            ..self
        }
    }
}

/// Configuration for [`crate::Deleter`]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleterConfig {
    /// Retry budget for building the client and deleting the cluster
    #[serde(with = "serde_duration")]
    pub delete_cluster_timeout: Duration,
    /// Pause between attempts
    #[serde(with = "serde_duration")]
    pub retry_backoff: Duration,
}

impl Default for DeleterConfig {
    fn default() -> Self {
        Self {
            delete_cluster_timeout: DEFAULT_DELETE_CLUSTER_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl DeleterConfig {
    /// Defaults with every timeout lifted
    pub fn no_timeouts() -> Self {
        Self::default().without_timeouts()
    }

    /// Keep backoff, lift the timeout
    pub fn without_timeouts(self) -> Self {
        Self {
            delete_cluster_timeout: Duration::MAX,
            ..self
        }
    }
}

/// Configuration for [`crate::Mover`]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MoverConfig {
    /// Retry budget for the whole move sequence
    #[serde(with = "serde_duration")]
    pub move_cluster_timeout: Duration,
    /// Pause between attempts
    #[serde(with = "serde_duration")]
    pub retry_backoff: Duration,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            move_cluster_timeout: DEFAULT_MOVE_CLUSTER_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl MoverConfig {
    /// Defaults with every timeout lifted
    pub fn no_timeouts() -> Self {
        Self::default().without_timeouts()
    }

    /// Keep backoff, lift the timeout
    pub fn without_timeouts(self) -> Self {
        Self {
            move_cluster_timeout: Duration::MAX,
            ..self
        }
    }
}

mod serde_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let applier = ApplierConfig::default();
        assert_eq!(applier.apply_cluster_timeout, Duration::from_secs(120));
        assert_eq!(applier.wait_for_cluster_reconcile, Duration::from_secs(3600));
        assert_eq!(applier.wait_for_failure_message, Duration::from_secs(600));
        assert_eq!(applier.retry_backoff, Duration::from_secs(1));
        assert_eq!(applier.condition_check_total_count, 20);

        assert_eq!(
            DeleterConfig::default().delete_cluster_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(
            MoverConfig::default().move_cluster_timeout,
            Duration::from_secs(180)
        );
    }

    #[test]
    fn no_timeouts_lifts_every_bound() {
        let applier = ApplierConfig::no_timeouts();
        assert_eq!(applier.apply_cluster_timeout, Duration::MAX);
        assert_eq!(applier.wait_for_cluster_reconcile, Duration::MAX);
        assert_eq!(applier.wait_for_failure_message, Duration::MAX);
        assert_eq!(applier.retry_backoff, DEFAULT_RETRY_BACKOFF);

        assert_eq!(DeleterConfig::no_timeouts().delete_cluster_timeout, Duration::MAX);
        assert_eq!(MoverConfig::no_timeouts().move_cluster_timeout, Duration::MAX);
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let applier: ApplierConfig =
            serde_yaml::from_str("waitForClusterReconcile: 90\nconditionCheckTotalCount: 3\n")
                .unwrap();
        assert_eq!(applier.wait_for_cluster_reconcile, Duration::from_secs(90));
        assert_eq!(applier.condition_check_total_count, 3);
        assert_eq!(applier.apply_cluster_timeout, DEFAULT_APPLY_CLUSTER_TIMEOUT);

        let mover: MoverConfig = serde_yaml::from_str("retryBackoff: 5\n").unwrap();
        assert_eq!(mover.retry_backoff, Duration::from_secs(5));
        assert_eq!(mover.move_cluster_timeout, DEFAULT_MOVE_CLUSTER_TIMEOUT);
    }
}
