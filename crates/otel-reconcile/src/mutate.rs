//! Per-kind merge of desired state onto live objects
//!
//! The engine never writes the desired object verbatim. It copies the
//! fields it owns onto the object read from the server, so server-assigned
//! fields (clusterIP, defaulted pod fields, status) survive, and a merge
//! that changes nothing can be detected and skipped.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::kind::OwnedKind;

/// The desired object changes a field the API server refuses to update
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("immutable field {field} would change")]
pub struct ImmutableFieldChange {
    /// Dotted path of the field
    pub field: String,
}

impl ImmutableFieldChange {
    fn at(path: &[&str]) -> Self {
        Self {
            field: path.join("."),
        }
    }
}

/// Deep merge `src` onto `dst`.
///
/// Objects merge key by key, a `null` in `src` never erases anything, and
/// any other `src` value (scalar or array) replaces what is in `dst`.
pub fn merge_override(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (_, Value::Null) => {}
        (Value::Object(d), Value::Object(s)) => {
            for (key, value) in s {
                if value.is_null() {
                    continue;
                }
                match d.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_override(existing, value)
                    }
                    _ => {
                        d.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (d, s) => *d = s.clone(),
    }
}

/// Merge `desired` onto `existing` using the rules for `kind`.
///
/// Fails without touching anything when an immutable field would change;
/// the caller is expected to delete and recreate the object.
pub fn merge_desired(
    kind: OwnedKind,
    existing: &DynamicObject,
    desired: &DynamicObject,
) -> Result<DynamicObject, ImmutableFieldChange> {
    check_immutable(kind, &existing.data, &desired.data)?;

    let mut merged = existing.clone();
    merge_string_map(&mut merged.metadata.labels, &desired.metadata.labels);
    merge_string_map(&mut merged.metadata.annotations, &desired.metadata.annotations);
    if let Some(refs) = desired
        .metadata
        .owner_references
        .as_ref()
        .filter(|r| !r.is_empty())
    {
        merged.metadata.owner_references = Some(refs.clone());
    }

    let have = &mut merged.data;
    let want = &desired.data;
    match kind {
        OwnedKind::ConfigMap => {
            replace_path(have, want, &["data"]);
            replace_path(have, want, &["binaryData"]);
        }
        OwnedKind::Secret => replace_path(have, want, &["data"]),
        OwnedKind::ServiceAccount => {}
        OwnedKind::Service => {
            replace_path(have, want, &["spec", "ports"]);
            merge_path(have, want, &["spec", "selector"]);
        }
        OwnedKind::Deployment => {
            replace_path(have, want, &["spec", "replicas"]);
            merge_path(have, want, &["spec", "template"]);
            merge_path(have, want, &["spec", "strategy"]);
        }
        OwnedKind::DaemonSet => merge_path(have, want, &["spec"]),
        OwnedKind::StatefulSet => {
            replace_path(have, want, &["spec", "replicas"]);
            replace_path(have, want, &["spec", "podManagementPolicy"]);
            merge_path(have, want, &["spec", "template"]);
        }
        OwnedKind::Role | OwnedKind::ClusterRole => replace_path(have, want, &["rules"]),
        OwnedKind::RoleBinding | OwnedKind::ClusterRoleBinding => {
            replace_path(have, want, &["subjects"])
        }
        OwnedKind::Ingress => {
            replace_path(have, want, &["spec", "defaultBackend"]);
            replace_path(have, want, &["spec", "rules"]);
            replace_path(have, want, &["spec", "tls"]);
        }
        OwnedKind::HorizontalPodAutoscaler
        | OwnedKind::PodDisruptionBudget
        | OwnedKind::NetworkPolicy
        | OwnedKind::ServiceMonitor
        | OwnedKind::PodMonitor
        | OwnedKind::Route
        | OwnedKind::OpenTelemetryCollector
        | OwnedKind::TargetAllocator => replace_path(have, want, &["spec"]),
    }

    Ok(merged)
}

/// Whether `merged` would change anything on the server compared to `existing`
pub fn is_noop(existing: &DynamicObject, merged: &DynamicObject) -> bool {
    existing.metadata == merged.metadata && existing.data == merged.data
}

fn check_immutable(kind: OwnedKind, have: &Value, want: &Value) -> Result<(), ImmutableFieldChange> {
    const SELECTOR: &[&str] = &["spec", "selector"];
    match kind {
        OwnedKind::Deployment | OwnedKind::DaemonSet => unchanged(have, want, SELECTOR),
        OwnedKind::StatefulSet => {
            unchanged(have, want, SELECTOR)?;
            if volume_claim_templates_changed(have, want) {
                return Err(ImmutableFieldChange::at(&["spec", "volumeClaimTemplates"]));
            }
            Ok(())
        }
        OwnedKind::RoleBinding | OwnedKind::ClusterRoleBinding => unchanged(have, want, &["roleRef"]),
        _ => Ok(()),
    }
}

/// A field the desired object does not set is not asserted and never counts as a change.
fn unchanged(have: &Value, want: &Value, path: &[&str]) -> Result<(), ImmutableFieldChange> {
    match get_path(want, path) {
        Some(w) if Some(w) != get_path(have, path) => Err(ImmutableFieldChange::at(path)),
        _ => Ok(()),
    }
}

fn volume_claim_templates_changed(have: &Value, want: &Value) -> bool {
    const PATH: &[&str] = &["spec", "volumeClaimTemplates"];
    let empty = Vec::new();
    let have = get_path(have, PATH).and_then(Value::as_array).unwrap_or(&empty);
    let want = get_path(want, PATH).and_then(Value::as_array).unwrap_or(&empty);

    if have.len() != want.len() {
        return true;
    }

    have.iter().zip(want).any(|(h, w)| {
        let name = |v: &Value| get_path(v, &["metadata", "name"]).cloned();
        let annotations = |v: &Value| {
            get_path(v, &["metadata", "annotations"])
                .filter(|a| a.as_object().is_some_and(|m| !m.is_empty()))
                .cloned()
        };
        if name(h) != name(w) || annotations(h) != annotations(w) {
            return true;
        }

        // volumeMode is defaulted by the API server
        let mut want_spec = w.get("spec").cloned().unwrap_or(Value::Null);
        let have_spec = h.get("spec").cloned().unwrap_or(Value::Null);
        if let (Some(ws), Some(mode)) = (want_spec.as_object_mut(), have_spec.get("volumeMode")) {
            if ws.get("volumeMode").map_or(true, |m| m.is_null() || m == "") {
                ws.insert("volumeMode".to_string(), mode.clone());
            }
        }
        want_spec != have_spec
    })
}

fn merge_string_map(
    dst: &mut Option<BTreeMap<String, String>>,
    src: &Option<BTreeMap<String, String>>,
) {
    let Some(src) = src.as_ref().filter(|m| !m.is_empty()) else {
        return;
    };
    let dst = dst.get_or_insert_with(BTreeMap::new);
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .filter(|v| !v.is_null())
}

/// Parent object of `path`, created along the way when `create` is set
fn parent_mut<'a>(value: &'a mut Value, path: &[&str], create: bool) -> Option<&'a mut Map<String, Value>> {
    let (_, parents) = path.split_last()?;
    let mut cur = value;
    for key in parents {
        if !cur.is_object() {
            if !create {
                return None;
            }
            *cur = Value::Object(Map::new());
        }
        let obj = cur.as_object_mut()?;
        if !obj.contains_key(*key) {
            if !create {
                return None;
            }
            obj.insert((*key).to_string(), Value::Object(Map::new()));
        }
        cur = obj.get_mut(*key)?;
    }
    if !cur.is_object() {
        if !create {
            return None;
        }
        *cur = Value::Object(Map::new());
    }
    cur.as_object_mut()
}

/// Set the field to the desired value, or remove it when desired leaves it unset
fn replace_path(have: &mut Value, want: &Value, path: &[&str]) {
    let Some(leaf) = path.last() else { return };
    match get_path(want, path) {
        Some(w) => {
            if let Some(parent) = parent_mut(have, path, true) {
                parent.insert((*leaf).to_string(), w.clone());
            }
        }
        None => {
            if let Some(parent) = parent_mut(have, path, false) {
                parent.remove(*leaf);
            }
        }
    }
}

/// Deep merge the desired value into the field
fn merge_path(have: &mut Value, want: &Value, path: &[&str]) {
    let Some(leaf) = path.last() else { return };
    let Some(w) = get_path(want, path) else { return };
    if let Some(parent) = parent_mut(have, path, true) {
        let slot = parent.entry((*leaf).to_string()).or_insert(Value::Null);
        merge_override(slot, w);
    }
}
