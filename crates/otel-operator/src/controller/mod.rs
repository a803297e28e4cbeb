//! Controllers for the operator's custom resources
//!
//! All four controllers share the same shape: acquire the per-parent gate,
//! handle deletion, build desired children, hand them to the apply/GC engine
//! and report the outcome on the parent's status. [`Context`] carries the
//! collaborators; each controller gets its own instance so its owner index is
//! fed by exactly one set of watch streams.

pub mod bridge;
pub mod cluster_observability;
pub mod collector;
pub mod status;
pub mod target_allocator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, error, info, warn};

use otel_common::crd::{ClusterObservability, OpAMPBridge, OpenTelemetryCollector, TargetAllocator};
use otel_common::events::{EventPublisher, KubeEventPublisher};
use otel_common::featuregate::FeatureGates;
use otel_common::kube_utils::{object_key, patch_resource_status};
use otel_common::retry::{retry_with_backoff_if, RetryConfig};
use otel_common::{Error, FINALIZER, OPERATOR_NAME};
use otel_reconcile::retention::withhold_config_versions;
use otel_reconcile::{
    collect_owned, owned_kinds, ApplySummary, CapabilityRegistry, ControllerRole, DesiredObject,
    KeyedGate, KubeObjectClient, ObjectClient, ObjectKey, OwnedKind, OwnerIndex, OwnerInfo,
    Reconciler,
};

/// First requeue delay after a failure
const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Requeue delays stop growing here
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Parent custom resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    /// OpenTelemetryCollector
    Collector,
    /// TargetAllocator
    TargetAllocator,
    /// OpAMPBridge
    OpAMPBridge,
    /// ClusterObservability
    ClusterObservability,
}

/// A parent by kind, namespace and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Parent kind
    pub kind: ParentKind,
    /// Parent namespace
    pub namespace: String,
    /// Parent name
    pub name: String,
}

impl ParentRef {
    /// Reference to a namespaced parent object
    pub fn of<K: Resource>(kind: ParentKind, obj: &K) -> Self {
        Self {
            kind,
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

/// Writes against parent objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ParentClient: Send + Sync {
    /// Add the operator finalizer if missing
    async fn add_finalizer(&self, parent: &ParentRef) -> Result<(), Error>;

    /// Remove the operator finalizer if present
    async fn remove_finalizer(&self, parent: &ParentRef) -> Result<(), Error>;

    /// Merge-patch `/status`
    async fn patch_status(&self, parent: &ParentRef, status: serde_json::Value) -> Result<(), Error>;

    /// Every ClusterObservability in the cluster
    async fn list_cluster_observabilities(&self) -> Result<Vec<ClusterObservability>, Error>;
}

/// [`ParentClient`] backed by the Kubernetes API
pub struct KubeParentClient {
    client: Client,
}

impl KubeParentClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers(&self, parent: &ParentRef, add: bool) -> Result<(), Error> {
        retry_with_backoff_if(&RetryConfig::on_conflict(), "patch finalizers", Error::is_conflict, || {
            self.patch_finalizers_once(parent, add)
        })
        .await
    }

    async fn patch_finalizers_once(&self, parent: &ParentRef, add: bool) -> Result<(), Error> {
        let current = match parent.kind {
            ParentKind::Collector => self.finalizers::<OpenTelemetryCollector>(parent).await?,
            ParentKind::TargetAllocator => self.finalizers::<TargetAllocator>(parent).await?,
            ParentKind::OpAMPBridge => self.finalizers::<OpAMPBridge>(parent).await?,
            ParentKind::ClusterObservability => self.finalizers::<ClusterObservability>(parent).await?,
        };
        let Some((finalizers, resource_version)) = current else {
            return Ok(());
        };
        let Some(patch) = finalizer_patch(finalizers, resource_version.as_deref(), add) else {
            return Ok(());
        };

        let params = PatchParams::apply(OPERATOR_NAME);
        let result = match parent.kind {
            ParentKind::Collector => self.patch::<OpenTelemetryCollector>(parent, &params, &patch).await,
            ParentKind::TargetAllocator => self.patch::<TargetAllocator>(parent, &params, &patch).await,
            ParentKind::OpAMPBridge => self.patch::<OpAMPBridge>(parent, &params, &patch).await,
            ParentKind::ClusterObservability => {
                self.patch::<ClusterObservability>(parent, &params, &patch).await
            }
        };
        match result {
            Err(e) if otel_common::error::is_not_found(&e) => Ok(()),
            other => other.map_err(Error::from),
        }
    }

    /// Current finalizers and resource version, `None` if the parent is gone
    async fn finalizers<K>(&self, parent: &ParentRef) -> Result<Option<(Vec<String>, Option<String>)>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &parent.namespace);
        Ok(api
            .get_opt(&parent.name)
            .await?
            .map(|obj| (obj.finalizers().to_vec(), obj.resource_version())))
    }

    async fn patch<K>(
        &self,
        parent: &ParentRef,
        params: &PatchParams,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &parent.namespace);
        api.patch(&parent.name, params, &Patch::Merge(patch)).await?;
        Ok(())
    }
}

/// Merge patch adding or removing the operator finalizer, `None` if it is
/// already in the requested state.
///
/// Carrying the read `resourceVersion` makes the server reject the patch
/// with 409 when another writer changed the list in between.
fn finalizer_patch(
    mut finalizers: Vec<String>,
    resource_version: Option<&str>,
    add: bool,
) -> Option<serde_json::Value> {
    let present = finalizers.iter().any(|f| f == FINALIZER);
    if add == present {
        return None;
    }
    if add {
        finalizers.push(FINALIZER.to_string());
    } else {
        finalizers.retain(|f| f != FINALIZER);
    }

    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = json!(rv);
    }
    Some(json!({ "metadata": metadata }))
}

#[async_trait]
impl ParentClient for KubeParentClient {
    async fn add_finalizer(&self, parent: &ParentRef) -> Result<(), Error> {
        self.patch_finalizers(parent, true).await
    }

    async fn remove_finalizer(&self, parent: &ParentRef) -> Result<(), Error> {
        self.patch_finalizers(parent, false).await
    }

    async fn patch_status(&self, parent: &ParentRef, status: serde_json::Value) -> Result<(), Error> {
        let (client, name, ns) = (&self.client, parent.name.as_str(), parent.namespace.as_str());
        match parent.kind {
            ParentKind::Collector => patch_resource_status::<OpenTelemetryCollector>(client, name, ns, &status).await,
            ParentKind::TargetAllocator => patch_resource_status::<TargetAllocator>(client, name, ns, &status).await,
            ParentKind::OpAMPBridge => patch_resource_status::<OpAMPBridge>(client, name, ns, &status).await,
            ParentKind::ClusterObservability => {
                patch_resource_status::<ClusterObservability>(client, name, ns, &status).await
            }
        }
        .map_err(Error::from)
    }

    async fn list_cluster_observabilities(&self) -> Result<Vec<ClusterObservability>, Error> {
        let api: Api<ClusterObservability> = Api::all(self.client.clone());
        Ok(api.list(&Default::default()).await?.items)
    }
}

/// Shared state for one controller
pub struct Context {
    /// Which controller this context belongs to
    pub role: ControllerRole,
    /// Child object access
    pub objects: Arc<dyn ObjectClient>,
    /// Parent object access
    pub parents: Arc<dyn ParentClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Cluster capability snapshot
    pub registry: Arc<CapabilityRegistry>,
    /// Startup feature gates
    pub gates: Arc<FeatureGates>,
    /// Owner-key index fed by this controller's child watches
    pub index: Arc<OwnerIndex>,
    /// Per-parent single flight
    pub gate: KeyedGate,
    reconciler: Reconciler,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Production context talking to the cluster through `client`
    pub fn new(
        role: ControllerRole,
        client: Client,
        registry: Arc<CapabilityRegistry>,
        gates: Arc<FeatureGates>,
    ) -> Self {
        let controller_name = format!("{OPERATOR_NAME}/{}", role_name(role));
        Self::from_parts(
            role,
            Arc::new(KubeObjectClient::new(client.clone())),
            Arc::new(KubeParentClient::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, &controller_name)),
            registry,
            gates,
        )
    }

    /// Context built from explicit collaborators
    pub fn from_parts(
        role: ControllerRole,
        objects: Arc<dyn ObjectClient>,
        parents: Arc<dyn ParentClient>,
        events: Arc<dyn EventPublisher>,
        registry: Arc<CapabilityRegistry>,
        gates: Arc<FeatureGates>,
    ) -> Self {
        Self {
            role,
            reconciler: Reconciler::new(objects.clone()),
            objects,
            parents,
            events,
            registry,
            gates,
            index: Arc::new(OwnerIndex::new()),
            gate: KeyedGate::new(),
            failures: DashMap::new(),
        }
    }

    /// Kinds this controller owns under the current capabilities
    pub fn owned_kinds(&self) -> Vec<OwnedKind> {
        owned_kinds(self.role, &self.registry.current(), &self.gates)
    }

    /// Bump the consecutive failure count for `key`, returning the new count
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget failures for `key`
    pub fn record_success(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop all per-parent state for `key` once its parent is being deleted
    pub fn forget(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures currently recorded for `key`
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|count| *count).unwrap_or(0)
    }
}

fn role_name(role: ControllerRole) -> &'static str {
    match role {
        ControllerRole::Collector => "collector",
        ControllerRole::TargetAllocator => "targetallocator",
        ControllerRole::OpAMPBridge => "opampbridge",
        ControllerRole::ClusterObservability => "clusterobservability",
    }
}

/// Requeue delay after `failures` consecutive failures: 5s doubling, capped at 5m
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(BACKOFF_MAX)
}

/// Shared error policy for every controller
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    let key = object_key(obj.namespace().as_deref(), &obj.name_any());
    let failures = ctx.record_failure(&key);
    let delay = backoff_delay(failures);
    error!(
        ?error,
        resource = %key,
        failures,
        requeue_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

/// Engine-facing description of a parent
pub fn owner_info<K>(obj: &K, component: &str) -> Result<OwnerInfo, Error>
where
    K: Resource<DynamicType = ()>,
{
    let resource = object_key(obj.namespace().as_deref(), &obj.name_any());
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::validation(&resource, "parent has no namespace"))?;
    let uid = obj
        .uid()
        .ok_or_else(|| Error::validation(&resource, "parent has no uid"))?;
    Ok(OwnerInfo {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        namespace,
        name: obj.name_any(),
        uid,
        component: component.to_string(),
    })
}

/// Config map versions to keep out of the prune set
#[derive(Debug, Clone, Copy)]
pub struct Retention<'a> {
    /// Component label of the versioned config maps
    pub component: &'a str,
    /// Versions requested by the parent
    pub versions: i32,
}

/// Collect owned children and run the apply/GC engine
pub async fn converge(
    ctx: &Context,
    owner: &OwnerInfo,
    desired: Vec<DesiredObject>,
    kinds: &[OwnedKind],
    retention: Option<Retention<'_>>,
) -> Result<ApplySummary, Error> {
    let mut owned = collect_owned(ctx.objects.as_ref(), &ctx.index, owner, kinds).await?;
    if let Some(retention) = retention {
        let withheld = withhold_config_versions(&mut owned, retention.component, retention.versions);
        debug!(withheld, "Retaining config map versions");
    }
    ctx.reconciler.reconcile(owner, desired, owned).await
}

/// Whether the operator finalizer is present
pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Delete cluster-scoped children of a parent being deleted, then release it.
///
/// Namespaced children are left to owner-reference garbage collection.
pub async fn finalize(ctx: &Context, parent: &ParentRef, owner: &OwnerInfo) -> Result<(), Error> {
    let selector = owner.label_selector();
    let mut errors = Vec::new();

    for kind in ctx.owned_kinds().into_iter().filter(|k| !k.is_namespaced()) {
        let children = match ctx.objects.list(kind, None, &selector).await {
            Ok(children) => children,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        for child in children {
            let key = ObjectKey::of(kind, &child);
            match ctx.objects.delete(&key).await {
                Ok(()) => info!(child = %key, "Deleted cluster-scoped child"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(child = %key, error = %e, "Failed to delete cluster-scoped child");
                    errors.push(Error::prune(kind.kind_str(), key.to_string(), e.to_string()));
                }
            }
        }
    }

    if let Some(err) = Error::join(errors) {
        return Err(err);
    }
    ctx.parents.remove_finalizer(parent).await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use kube::api::DynamicObject;
    use otel_common::events::NoopEventPublisher;
    use otel_reconcile::CapabilityProbe;

    mockall::mock! {
        pub Objects {}

        #[async_trait]
        impl ObjectClient for Objects {
            async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error>;
            async fn list(
                &self,
                kind: OwnedKind,
                namespace: Option<String>,
                label_selector: &str,
            ) -> Result<Vec<DynamicObject>, Error>;
            async fn create(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error>;
            async fn replace(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error>;
            async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;
        }
    }

    mockall::mock! {
        pub Events {}

        #[async_trait]
        impl EventPublisher for Events {
            async fn publish(
                &self,
                resource_ref: &k8s_openapi::api::core::v1::ObjectReference,
                type_: kube::runtime::events::EventType,
                reason: &str,
                action: &str,
                note: Option<String>,
            );
        }
    }

    /// An API error with the given status code
    pub fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} from test"),
            reason: reason.into(),
            code,
        }))
    }

    /// Probe answering from fixed flags
    #[derive(Default)]
    pub struct FixedProbe {
        pub rbac: bool,
        pub prometheus: bool,
        pub routes: bool,
    }

    #[async_trait]
    impl CapabilityProbe for FixedProbe {
        async fn rbac_creatable(&self) -> Result<bool, Error> {
            Ok(self.rbac)
        }
        async fn prometheus_crds(&self) -> Result<bool, Error> {
            Ok(self.prometheus)
        }
        async fn routes(&self) -> Result<bool, Error> {
            Ok(self.routes)
        }
        async fn target_allocator_crd(&self) -> Result<bool, Error> {
            Ok(false)
        }
        async fn fips(&self) -> Result<bool, Error> {
            Ok(false)
        }
    }

    /// Registry already refreshed from `probe`
    pub async fn registry(probe: FixedProbe) -> Arc<CapabilityRegistry> {
        let registry = Arc::new(CapabilityRegistry::new(Arc::new(probe)));
        registry.refresh().await;
        registry
    }

    pub async fn context_with(
        role: ControllerRole,
        objects: MockObjects,
        parents: MockParentClient,
        events: Arc<dyn EventPublisher>,
        probe: FixedProbe,
    ) -> Context {
        Context::from_parts(
            role,
            Arc::new(objects),
            Arc::new(parents),
            events,
            registry(probe).await,
            Arc::new(FeatureGates::default()),
        )
    }

    pub async fn context(role: ControllerRole, objects: MockObjects, parents: MockParentClient) -> Context {
        context_with(role, objects, parents, Arc::new(NoopEventPublisher), FixedProbe::default()).await
    }

    /// Object client for a namespace without children: lists are empty and
    /// every create succeeds
    pub fn empty_cluster() -> MockObjects {
        let mut objects = MockObjects::new();
        objects.expect_list().returning(|_, _, _| Ok(vec![]));
        objects.expect_get().returning(|_| Ok(None));
        objects.expect_create().returning(|_, obj| {
            let mut created = obj.clone();
            created.metadata.uid = Some(format!("uid-{}", obj.name_any()));
            created.metadata.resource_version = Some("1".into());
            Ok(created)
        });
        objects
    }
}
