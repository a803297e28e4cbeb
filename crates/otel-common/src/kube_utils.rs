//! Shared Kubernetes helpers
//!
//! Children are handled as [`DynamicObject`]s addressed through an
//! [`ApiResource`] built from a known apiVersion and kind, so one code path
//! serves core kinds, apps kinds and third-party CRDs alike.

use std::fmt::Write as _;

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use sha2::{Digest, Sha256};

/// Longest value the API server accepts for a label
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Hex characters of the digest appended to shortened label values
const LABEL_HASH_LEN: usize = 8;

/// Irregular plurals; everything else follows the English suffix rules below.
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podmonitor", "podmonitors"),
    ("servicemonitor", "servicemonitors"),
    ("opampbridge", "opampbridges"),
];

/// Build an ApiResource from a known apiVersion and kind.
///
/// ```ignore
/// let ar = build_api_resource("apps/v1", "Deployment");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "default", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split `group/version` into its parts; the core group is the empty string.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(s, _)| *s == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}

/// Deterministic hex digest of `input`, truncated to `len` hex characters.
///
/// Truncated SHA-256, stable across toolchains, so it can be persisted in
/// object names and annotations.
pub fn deterministic_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = digest.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    });
    out.truncate(len.min(64));
    out
}

/// `value` if it fits in a label, otherwise a prefix of it followed by
/// `-<hash of value>`. Distinct long inputs keep distinct outputs.
pub fn label_value(value: &str) -> String {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value.to_string();
    }
    let mut keep = MAX_LABEL_VALUE_LEN - LABEL_HASH_LEN - 1;
    while !value.is_char_boundary(keep) {
        keep -= 1;
    }
    let prefix = value[..keep].trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    format!("{prefix}-{}", deterministic_hash(value, LABEL_HASH_LEN))
}

/// Value of the instance label for a parent: `<namespace>.<name>`,
/// shortened with [`label_value`] when too long
pub fn instance_label(namespace: &str, name: &str) -> String {
    label_value(&format!("{namespace}.{name}"))
}

/// `namespace/name`, or `name` for cluster-scoped objects
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// `namespace/name` of a dynamic object
pub fn dynamic_key(obj: &DynamicObject) -> String {
    object_key(obj.namespace().as_deref(), &obj.name_any())
}

/// Patch the status sub-resource of a namespaced resource.
///
/// Serializes `status` into `{ "status": <status> }` and sends it as a
/// merge-patch, so fields the operator does not report are left alone.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
