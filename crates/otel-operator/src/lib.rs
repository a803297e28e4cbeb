//! OpenTelemetry operator: reconciles collectors, target allocators, OpAMP
//! bridges and cluster-wide observability into Kubernetes workloads

#![deny(missing_docs)]

/// Flags and environment configuration
pub mod config;
/// Per-kind reconcilers and their shared context
pub mod controller;
/// Wiring of controllers to watches
pub mod controller_runner;
/// Desired-state builders for child objects
pub mod manifests;
