//! Capability Registry
//!
//! Which optional cluster APIs and permissions exist decides which child
//! kinds the controllers own. The registry probes them, keeps the result as
//! an immutable snapshot, and swaps a new snapshot in only when something
//! changed. Controllers subscribe and re-reconcile every parent on change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::discovery::Discovery;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use otel_common::Error;

use crate::diff::{self, hash_of, ContentHash, ItemHash};

const FIPS_PATH: &str = "/proc/sys/crypto/fips_enabled";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const RBAC_VERBS: &[&str] = &["create", "get", "list", "update", "delete"];
const RBAC_RESOURCES: &[&str] = &["clusterroles", "clusterrolebindings"];

/// Whether one optional API or permission is present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Availability {
    /// Present and usable
    Available,
    /// Absent, forbidden, or the probe failed
    #[default]
    Unavailable,
}

impl Availability {
    /// `true` for [`Availability::Available`]
    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

impl From<bool> for Availability {
    fn from(present: bool) -> Self {
        if present {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

impl ContentHash for Availability {
    fn content_hash(&self) -> ItemHash {
        hash_of(self)
    }
}

/// Immutable snapshot of every capability flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Bumped every time a refresh changes any flag
    pub generation: u64,
    /// The operator may create cluster roles and bindings
    pub rbac: Availability,
    /// ServiceMonitor and PodMonitor are served
    pub prometheus_crds: Availability,
    /// OpenShift Routes are served
    pub routes: Availability,
    /// The TargetAllocator custom resource is served
    pub target_allocator_crd: Availability,
    /// The node runs in FIPS mode
    pub fips: Availability,
}

impl Capabilities {
    /// Whether cluster-scoped RBAC objects can be created
    pub fn rbac_creatable(&self) -> bool {
        self.rbac.is_available()
    }

    /// Whether the Prometheus operator CRDs exist
    pub fn prometheus_crds_present(&self) -> bool {
        self.prometheus_crds.is_available()
    }

    /// Whether OpenShift Routes exist
    pub fn routes_present(&self) -> bool {
        self.routes.is_available()
    }

    /// Whether the TargetAllocator CRD is installed
    pub fn target_allocator_crd_present(&self) -> bool {
        self.target_allocator_crd.is_available()
    }

    /// Whether FIPS mode is on
    pub fn fips_enabled(&self) -> bool {
        self.fips.is_available()
    }

    /// Flags by name, for diffing and logging
    pub fn flags(&self) -> BTreeMap<&'static str, Availability> {
        BTreeMap::from([
            ("rbac", self.rbac),
            ("prometheusCRDs", self.prometheus_crds),
            ("routes", self.routes),
            ("targetAllocatorCRD", self.target_allocator_crd),
            ("fips", self.fips),
        ])
    }

    fn same_flags(&self, other: &Self) -> bool {
        self.flags() == other.flags()
    }
}

/// Individual capability checks against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Every RBAC verb needed on cluster roles and bindings is allowed
    async fn rbac_creatable(&self) -> Result<bool, Error>;
    /// Both Prometheus monitor kinds are served
    async fn prometheus_crds(&self) -> Result<bool, Error>;
    /// The OpenShift route group is served
    async fn routes(&self) -> Result<bool, Error>;
    /// The TargetAllocator kind is served
    async fn target_allocator_crd(&self) -> Result<bool, Error>;
    /// FIPS mode is on
    async fn fips(&self) -> Result<bool, Error>;
}

/// [`CapabilityProbe`] using discovery and self subject access reviews
pub struct KubeCapabilityProbe {
    client: Client,
}

impl KubeCapabilityProbe {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn serves(&self, group: &str, kinds: &[&str]) -> Result<bool, Error> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await?;
        let Some(api_group) = discovery.get(group) else {
            return Ok(false);
        };
        Ok(kinds.iter().all(|k| api_group.recommended_kind(k).is_some()))
    }

    async fn allowed(&self, verb: &str, resource: &str) -> Result<bool, Error> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(RBAC_GROUP.to_string()),
                    resource: Some(resource.to_string()),
                    verb: Some(verb.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = api.create(&PostParams::default(), &review).await?;
        Ok(response.status.is_some_and(|s| s.allowed))
    }
}

#[async_trait]
impl CapabilityProbe for KubeCapabilityProbe {
    async fn rbac_creatable(&self) -> Result<bool, Error> {
        for resource in RBAC_RESOURCES {
            for verb in RBAC_VERBS {
                if !self.allowed(verb, resource).await? {
                    debug!(verb, resource, "RBAC permission missing");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn prometheus_crds(&self) -> Result<bool, Error> {
        self.serves("monitoring.coreos.com", &["ServiceMonitor", "PodMonitor"])
            .await
    }

    async fn routes(&self) -> Result<bool, Error> {
        self.serves("route.openshift.io", &["Route"]).await
    }

    async fn target_allocator_crd(&self) -> Result<bool, Error> {
        self.serves(otel_common::API_GROUP, &["TargetAllocator"]).await
    }

    async fn fips(&self) -> Result<bool, Error> {
        match tokio::fs::read_to_string(FIPS_PATH).await {
            Ok(content) => Ok(content.trim() == "1"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::internal_with_context(e.to_string(), FIPS_PATH)),
        }
    }
}

/// Process-wide holder of the current [`Capabilities`] snapshot
pub struct CapabilityRegistry {
    probe: Arc<dyn CapabilityProbe>,
    snapshot: watch::Sender<Arc<Capabilities>>,
    refreshing: Mutex<()>,
}

impl CapabilityRegistry {
    /// Create a registry with every capability unavailable
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Capabilities::default()));
        Self {
            probe,
            snapshot,
            refreshing: Mutex::new(()),
        }
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<Capabilities> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<Arc<Capabilities>> {
        self.snapshot.subscribe()
    }

    /// One item per snapshot change, for `Controller::reconcile_all_on`
    pub fn changes(&self) -> impl Stream<Item = ()> + Send + Sync + 'static {
        WatchStream::from_changes(self.subscribe()).map(|_| ())
    }

    /// Re-probe every capability and publish a new snapshot if any changed.
    ///
    /// Probes run concurrently. A failed probe logs and reports that flag
    /// unavailable without affecting the others.
    pub async fn refresh(&self) -> Arc<Capabilities> {
        let _single_writer = self.refreshing.lock().await;

        let (rbac, prometheus_crds, routes, target_allocator_crd, fips) = tokio::join!(
            self.probe.rbac_creatable(),
            self.probe.prometheus_crds(),
            self.probe.routes(),
            self.probe.target_allocator_crd(),
            self.probe.fips(),
        );

        let current = self.current();
        let mut next = Capabilities {
            generation: current.generation,
            rbac: settle("rbac", rbac),
            prometheus_crds: settle("prometheusCRDs", prometheus_crds),
            routes: settle("routes", routes),
            target_allocator_crd: settle("targetAllocatorCRD", target_allocator_crd),
            fips: settle("fips", fips),
        };

        if next.same_flags(&current) {
            return current;
        }

        let changes = diff::maps(&current.flags(), &next.flags());
        for (flag, availability) in changes.additions() {
            info!(capability = flag, now = ?availability, "Cluster capability changed");
        }

        next.generation += 1;
        let next = Arc::new(next);
        self.snapshot.send_replace(next.clone());
        next
    }

    /// Refresh every `interval` until the task is aborted
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; startup already refreshed
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = self.refresh().await;
                debug!(generation = snapshot.generation, "Capabilities refreshed");
            }
        })
    }
}

fn settle(flag: &str, result: Result<bool, Error>) -> Availability {
    match result {
        Ok(present) => present.into(),
        Err(e) => {
            warn!(capability = flag, error = %e, "Capability probe failed, treating as unavailable");
            Availability::Unavailable
        }
    }
}
