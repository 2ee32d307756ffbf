//! Cluster lifecycle operations against a management cluster
//!
//! - [`Applier`]: server-side apply a cluster spec, then wait for the control
//!   plane, CNI, workers and overall readiness within one reconcile budget
//! - [`Deleter`]: retried delete of the root cluster object
//! - [`Mover`]: pause a cluster in its source management cluster and copy it
//!   and its children to a new one
//!
//! Every operation builds its clients through a
//! [`ClientFactory`](keel_common::ClientFactory) inside its retry loop, so a
//! transient API server error while connecting is retried like any other.

#![deny(missing_docs)]

mod applier;
pub mod config;
mod deleter;
mod mover;
mod retrying_client;

pub use applier::Applier;
pub use config::{ApplierConfig, DeleterConfig, MoverConfig};
pub use deleter::Deleter;
pub use mover::Mover;
pub use retrying_client::RetryingClient;
