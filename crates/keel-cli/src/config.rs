//! Settings file for tuning timeouts and backoffs.
//!
//! ```yaml
//! applier:
//!   waitForClusterReconcile: 5400
//!   conditionCheckTotalCount: 10
//! mover:
//!   moveClusterTimeout: 600
//! ```
//!
//! Every field is optional; missing ones keep their defaults. Command line
//! flags (`--no-timeouts`, `--retry-backoff-secs`) are applied on top.

use std::path::Path;
use std::time::Duration;

use keel_clustermanager::{ApplierConfig, DeleterConfig, MoverConfig};
use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "KEEL_CONFIG";

/// Timeouts and backoffs for every command
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Settings for `keel apply`
    pub applier: ApplierConfig,
    /// Settings for `keel delete`
    pub deleter: DeleterConfig,
    /// Settings for `keel move`
    pub mover: MoverConfig,
}

impl Settings {
    /// Load settings from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        Self::from_yaml(&data)
    }

    /// Parse settings from YAML
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, no_timeouts: bool, retry_backoff: Option<Duration>) -> Self {
        if no_timeouts {
            self.applier = self.applier.without_timeouts();
            self.deleter = self.deleter.without_timeouts();
            self.mover = self.mover.without_timeouts();
        }
        if let Some(backoff) = retry_backoff {
            self.applier.retry_backoff = backoff;
            self.deleter.retry_backoff = backoff;
            self.mover.retry_backoff = backoff;
        }
        self
    }
}
