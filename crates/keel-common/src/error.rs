//! Error types for keel
//!
//! Every failure surfaced by the cluster manager carries enough context (the
//! phase that was running) to localize the fault from the message alone.
//! Phases are layered with [`Error::with_context`], so the final message reads
//! like `waiting for cluster's workers to be ready: cluster doesn't yet have
//! condition WorkersReady`.

use thiserror::Error;

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has no more specific mapping
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The requested object does not exist
    #[error("{kind} \"{name}\" not found")]
    NotFound {
        /// Kubernetes kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Create was rejected because the object already exists
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists {
        /// Kubernetes kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Building a client from a kubeconfig failed
    #[error("client build error: {0}")]
    ClientBuild(String),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A polled condition is not (yet) satisfied
    #[error("{0}")]
    Condition(String),

    /// The cluster reports a failure that no amount of waiting will fix
    #[error("cluster has a validation error that doesn't seem transient: {0}")]
    ClusterValidation(String),

    /// An error annotated with the phase that produced it
    #[error("{context}: {source}")]
    Context {
        /// Phase or operation that was running
        context: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "create_client", "load_spec")
        context: String,
    },
}

impl Error {
    /// Wrap an error with the phase that produced it
    pub fn with_context(context: impl Into<String>, source: Error) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a condition-not-met error with the given message
    pub fn condition(msg: impl Into<String>) -> Self {
        Self::Condition(msg.into())
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// The innermost error, looking through phase annotations
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether create failed because the object is already present
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root_cause(), Error::AlreadyExists { .. })
    }

    /// Whether the target object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound { .. })
    }

    /// Whether waiting longer may make the error go away
    ///
    /// Validation failures reported by a controller and malformed manifests
    /// are final. Everything else is assumed to be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.root_cause(),
            Error::ClusterValidation(_) | Error::Serialization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a failed wait names the phase and the underlying cause
    #[test]
    fn story_context_names_phase_and_cause() {
        let err = Error::with_context(
            "waiting for cluster's control plane to be ready",
            Error::condition("cluster doesn't yet have condition ControlPlaneReady"),
        );
        assert_eq!(
            err.to_string(),
            "waiting for cluster's control plane to be ready: \
             cluster doesn't yet have condition ControlPlaneReady"
        );
    }

    #[test]
    fn nested_context_keeps_every_layer() {
        let err = Error::with_context(
            "moving cluster",
            Error::with_context(
                "creating cluster in target",
                Error::ClientBuild("connection refused".to_string()),
            ),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("moving cluster: creating cluster in target"));
        assert!(msg.ends_with("connection refused"));
    }

    /// Story: "already exists" is recognised through any number of phases
    #[test]
    fn story_already_exists_is_detected_through_context() {
        let err = Error::with_context(
            "creating cluster in target",
            Error::AlreadyExists {
                kind: "Cluster".to_string(),
                name: "prod".to_string(),
            },
        );
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        assert_eq!(
            err.root_cause().to_string(),
            "Cluster \"prod\" already exists"
        );
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = Error::ClusterValidation("cluster has an error: bad cidr".to_string());
        assert!(!err.is_retryable());
        assert!(err
            .to_string()
            .contains("cluster has a validation error that doesn't seem transient"));

        assert!(Error::condition("not yet").is_retryable());
        assert!(Error::NotFound {
            kind: "Cluster".to_string(),
            name: "a".to_string()
        }
        .is_retryable());
    }
}
