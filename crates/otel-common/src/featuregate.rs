//! Operator feature gates
//!
//! Gates are parsed once at startup from a comma-separated list and then
//! shared read-only. `+gate` or a bare `gate` enables, `-gate` disables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Decouples the target allocator into its own `TargetAllocator` resource
pub const TARGET_ALLOCATOR_CR: &str = "operator.collector.targetallocatorcr";
/// Lets the operator create Prometheus `ServiceMonitor`/`PodMonitor` objects
pub const PROMETHEUS_MONITORS: &str = "operator.observability.prometheus";

/// Maturity of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Off unless explicitly enabled
    Alpha,
    /// On unless explicitly disabled
    Beta,
}

struct GateDefinition {
    id: &'static str,
    stage: Stage,
    description: &'static str,
}

const KNOWN_GATES: &[GateDefinition] = &[
    GateDefinition {
        id: TARGET_ALLOCATOR_CR,
        stage: Stage::Alpha,
        description: "manage the target allocator through a TargetAllocator resource",
    },
    GateDefinition {
        id: PROMETHEUS_MONITORS,
        stage: Stage::Beta,
        description: "create ServiceMonitor and PodMonitor objects when the CRDs are installed",
    },
];

/// Error parsing a feature gate list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureGateError {
    /// The list named a gate this operator does not know
    #[error("unknown feature gate '{0}'")]
    Unknown(String),
    /// An entry was empty or only a sign
    #[error("empty feature gate entry in '{0}'")]
    Empty(String),
}

/// Immutable set of gate states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGates {
    enabled: BTreeMap<&'static str, bool>,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            enabled: KNOWN_GATES
                .iter()
                .map(|g| (g.id, g.stage == Stage::Beta))
                .collect(),
        }
    }
}

impl FeatureGates {
    /// Whether the named gate is on. Unknown names are off.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.get(id).copied().unwrap_or(false)
    }

    /// Shorthand for [`TARGET_ALLOCATOR_CR`]
    pub fn target_allocator_cr(&self) -> bool {
        self.is_enabled(TARGET_ALLOCATOR_CR)
    }

    /// Shorthand for [`PROMETHEUS_MONITORS`]
    pub fn prometheus_monitors(&self) -> bool {
        self.is_enabled(PROMETHEUS_MONITORS)
    }

    /// Return a copy with one gate forced to `on`.
    pub fn with(mut self, id: &str, on: bool) -> Result<Self, FeatureGateError> {
        let def = KNOWN_GATES
            .iter()
            .find(|g| g.id == id)
            .ok_or_else(|| FeatureGateError::Unknown(id.to_string()))?;
        self.enabled.insert(def.id, on);
        Ok(self)
    }

    /// Human-readable listing of every known gate, for `--help` style output
    pub fn describe() -> Vec<String> {
        KNOWN_GATES
            .iter()
            .map(|g| format!("{} ({:?}): {}", g.id, g.stage, g.description))
            .collect()
    }
}

impl FromStr for FeatureGates {
    type Err = FeatureGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = Self::default();
        for raw in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (on, id) = match raw.as_bytes()[0] {
                b'+' => (true, &raw[1..]),
                b'-' => (false, &raw[1..]),
                _ => (true, raw),
            };
            if id.is_empty() {
                return Err(FeatureGateError::Empty(s.to_string()));
            }
            gates = gates.with(id, on)?;
        }
        Ok(gates)
    }
}

impl fmt::Display for FeatureGates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .enabled
            .iter()
            .map(|(id, on)| format!("{}{id}", if *on { '+' } else { '-' }))
            .collect();
        f.write_str(&parts.join(","))
    }
}
