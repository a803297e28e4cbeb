//! Error types for the OpenTelemetry operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants that concern a single child object carry its kind and name so
//! a joined error stays readable when it surfaces on a status condition.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid custom resource specification
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// `namespace/name` of the resource with the invalid spec
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// The manifest builder could not produce the desired object set
    #[error("failed to build desired objects for {resource}: {message}")]
    Build {
        /// `namespace/name` of the parent being built
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Creating or updating a single child object failed
    #[error("failed to apply {kind} {name}: {message}")]
    Apply {
        /// Kind of the child object
        kind: String,
        /// `namespace/name` (or `name` for cluster-scoped kinds) of the child
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Deleting an orphaned child object failed
    #[error("failed to prune {kind} {name}: {message}")]
    Prune {
        /// Kind of the child object
        kind: String,
        /// `namespace/name` (or `name` for cluster-scoped kinds) of the child
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Several independent failures collected during one reconcile
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<Error>),

    /// This instance of a singleton resource lost the election
    #[error("multiple {kind} resources detected, {winner} is the active instance")]
    Conflicted {
        /// Kind of the singleton resource
        kind: String,
        /// `namespace/name` of the elected instance
        winner: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "capabilities")
        context: String,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error for the given resource
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a build error for the given parent
    pub fn build(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Build {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error for a child object
    pub fn apply(kind: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Apply {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a prune error for a child object
    pub fn prune(kind: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Prune {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Join accumulated errors into a single error.
    ///
    /// Returns `None` when nothing failed, the error itself when exactly one
    /// failed, and [`Error::Multiple`] otherwise.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Whether this error came from a 404 response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source } if is_not_found(source))
    }

    /// Whether this error came from a 409 response
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube { source } if is_conflict(source))
    }

    /// Whether the server refused an update to an immutable field
    pub fn is_immutable_rejection(&self) -> bool {
        matches!(self, Self::Kube { source } if is_immutable_rejection(source))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Whether the API server answered 404 Not Found
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether the API server answered 409.
///
/// Covers both a stale `resourceVersion` on update and `AlreadyExists` on
/// create; in both cases re-reading the object and trying again is correct.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Whether the API server rejected an update because it touched an immutable field
pub fn is_immutable_rejection(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Api(ae) if ae.code == 422 && ae.message.to_lowercase().contains("immutable")
    )
}
