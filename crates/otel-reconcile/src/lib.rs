//! Declarative reconciliation engine for the OpenTelemetry operator
//!
//! Turns a desired child set into cluster state: diffing, capability-gated
//! ownership, apply with conflict retry and immutable-field recreation,
//! orphan pruning, and singleton election.
//!
//! Related crates:
//! - `otel-common`: CRDs, errors and shared utilities
//! - `otel-operator`: controllers and manifest builders driving this engine

#![deny(missing_docs)]

pub mod apply;
pub mod capabilities;
pub mod client;
pub mod diff;
pub mod gate;
pub mod index;
pub mod kind;
pub mod mutate;
pub mod owned;
pub mod retention;
pub mod singleton;

pub use apply::{ApplySummary, DesiredObject, OwnedObject, OwnedObjects, OwnerInfo, Reconciler};
pub use capabilities::{
    Availability, Capabilities, CapabilityProbe, CapabilityRegistry, KubeCapabilityProbe,
};
pub use client::{KubeObjectClient, ObjectClient, ObjectKey};
pub use gate::KeyedGate;
pub use index::OwnerIndex;
pub use kind::OwnedKind;
pub use owned::{collect_owned, owned_kinds, ControllerRole};
pub use singleton::{elect, Election, SingletonCandidate};

pub use otel_common::{Error, Result};
