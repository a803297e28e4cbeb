//! Labels for generated children

use std::collections::BTreeMap;

use otel_common::kube_utils::instance_label;
use otel_common::{labels, OPERATOR_NAME};

/// Component label of collector children
pub const COLLECTOR_COMPONENT: &str = "opentelemetry-collector";
/// Component label of target allocator children
pub const TARGET_ALLOCATOR_COMPONENT: &str = "opentelemetry-targetallocator";
/// Component label of OpAMP bridge children
pub const BRIDGE_COMPONENT: &str = "opentelemetry-opamp-bridge";
/// Component label of cluster observability children
pub const CLUSTER_OBSERVABILITY_COMPONENT: &str = "opentelemetry-cluster-observability";

/// `<namespace>.<name>`, hashed down to label length when needed
pub fn instance(namespace: &str, name: &str) -> String {
    instance_label(namespace, name)
}

/// Pod selector for a workload. These labels end up in immutable
/// selectors, so nothing derived from the spec may go in here.
pub fn selector(namespace: &str, name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (labels::INSTANCE.to_string(), instance(namespace, name)),
        (labels::COMPONENT.to_string(), component.to_string()),
        (labels::PART_OF.to_string(), labels::PART_OF_VALUE.to_string()),
    ])
}

/// Labels for any child object: the selector plus the object name
pub fn common(namespace: &str, name: &str, object_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut out = selector(namespace, name, component);
    out.insert(labels::NAME.to_string(), object_name.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_stable_across_object_names() {
        let a = common("observability", "otel", "otel-collector", COLLECTOR_COMPONENT);
        let b = common("observability", "otel", "otel-collector-1a2b3c4d", COLLECTOR_COMPONENT);
        let sel = selector("observability", "otel", COLLECTOR_COMPONENT);
        assert!(sel.iter().all(|(k, v)| a.get(k) == Some(v) && b.get(k) == Some(v)));
        assert_eq!(sel[labels::INSTANCE], "observability.otel");
    }

    #[test]
    fn long_parent_names_still_yield_valid_selectors() {
        let name = "collector-".repeat(7);
        let sel = selector("observability", &name, COLLECTOR_COMPONENT);
        assert!(sel[labels::INSTANCE].len() <= 63);
        assert_eq!(sel, selector("observability", &name, COLLECTOR_COMPONENT));
    }
}
