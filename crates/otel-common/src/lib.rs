//! Common types for the OpenTelemetry operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod featuregate;
pub mod kube_utils;
pub mod leader_election;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name the operator reports as field manager, event reporter and `managed-by` label value
pub const OPERATOR_NAME: &str = "opentelemetry-operator";

/// API group of every custom resource the operator serves
pub const API_GROUP: &str = "opentelemetry.io";

/// Finalizer placed on parents whose cluster-scoped children need explicit cleanup
pub const FINALIZER: &str = "opentelemetry.io/finalizer";

/// Well-known label keys stamped on every managed child object.
pub mod labels {
    /// Identifies the controller that manages the object
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// `<namespace>.<name>` of the owning custom resource
    pub const INSTANCE: &str = "app.kubernetes.io/instance";
    /// Product grouping
    pub const PART_OF: &str = "app.kubernetes.io/part-of";
    /// Component the object belongs to (collector, target allocator, ...)
    pub const COMPONENT: &str = "app.kubernetes.io/component";
    /// Object name
    pub const NAME: &str = "app.kubernetes.io/name";
    /// Value of [`PART_OF`] for every managed object
    pub const PART_OF_VALUE: &str = "opentelemetry";
}
