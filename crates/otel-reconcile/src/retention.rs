//! ConfigMap retention
//!
//! Versioned config maps are named after a hash of their content, so every
//! config change produces a new one. Keeping the newest few around lets a
//! rollback of the workload find its old config.

use kube::api::DynamicObject;

use crate::apply::OwnedObjects;
use crate::kind::OwnedKind;

/// The `n` newest of `config_maps` by creation timestamp (at least one).
pub fn config_maps_to_keep(n: usize, mut config_maps: Vec<DynamicObject>) -> Vec<DynamicObject> {
    config_maps.sort_by(|a, b| {
        let ts = |o: &DynamicObject| o.metadata.creation_timestamp.as_ref().map(|t| t.0);
        ts(b).cmp(&ts(a))
    });
    config_maps.truncate(n.max(1));
    config_maps
}

/// Withhold the newest `versions + 1` config maps labelled with `component`
/// from `owned`, so pruning leaves them in place.
///
/// The extra one covers a pass that ends up not producing a new config map.
/// Returns how many entries were withheld.
pub fn withhold_config_versions(owned: &mut OwnedObjects, component: &str, versions: i32) -> usize {
    let keep = usize::try_from(versions.max(1)).unwrap_or(1) + 1;
    let candidates: Vec<DynamicObject> = owned
        .values()
        .filter(|o| o.kind == OwnedKind::ConfigMap)
        .filter(|o| {
            o.object
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(otel_common::labels::COMPONENT))
                .is_some_and(|c| c == component)
        })
        .map(|o| o.object.clone())
        .collect();

    let kept = config_maps_to_keep(keep, candidates);
    for cm in &kept {
        if let Some(uid) = cm.metadata.uid.as_deref() {
            owned.remove(uid);
        }
    }
    kept.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::OwnedObject;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(name: &str, secs: i64, component: &str) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("observability".to_string()),
                uid: Some(format!("uid-{name}")),
                creation_timestamp: Some(Time(chrono::Utc.timestamp_opt(secs, 0).unwrap())),
                labels: Some(BTreeMap::from([(
                    otel_common::labels::COMPONENT.to_string(),
                    component.to_string(),
                )])),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    fn names(objs: &[DynamicObject]) -> Vec<&str> {
        objs.iter().filter_map(|o| o.metadata.name.as_deref()).collect()
    }

    #[test]
    fn keeps_the_newest() {
        let kept = config_maps_to_keep(
            2,
            vec![cm("a", 1, "c"), cm("c", 3, "c"), cm("b", 2, "c"), cm("d", 4, "c")],
        );
        assert_eq!(names(&kept), vec!["d", "c"]);
    }

    #[test]
    fn keeps_at_least_one() {
        let kept = config_maps_to_keep(0, vec![cm("a", 1, "c"), cm("b", 2, "c")]);
        assert_eq!(names(&kept), vec!["b"]);
        assert!(config_maps_to_keep(3, vec![]).is_empty());
    }

    #[test]
    fn withholds_versions_plus_one_of_the_component() {
        let mut owned: OwnedObjects = [
            cm("v1", 1, "opentelemetry-collector"),
            cm("v2", 2, "opentelemetry-collector"),
            cm("v3", 3, "opentelemetry-collector"),
            cm("v4", 4, "opentelemetry-collector"),
            cm("ta", 5, "opentelemetry-targetallocator"),
        ]
        .into_iter()
        .map(|o| (o.metadata.uid.clone().unwrap(), OwnedObject::new(OwnedKind::ConfigMap, o)))
        .collect();

        let withheld = withhold_config_versions(&mut owned, "opentelemetry-collector", 2);

        assert_eq!(withheld, 3);
        let left: Vec<_> = owned.keys().cloned().collect();
        assert_eq!(left, vec!["uid-ta".to_string(), "uid-v1".to_string()]);
    }
}
