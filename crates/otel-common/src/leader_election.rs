//! Lease-based leader election
//!
//! Only one operator replica runs controllers at a time. The holder renews a
//! `coordination.k8s.io/v1` Lease; standbys poll it and take over once it
//! expires or is released.
//!
//! Every write carries the resourceVersion that was read, so two replicas
//! racing for an expired lease cannot both win: the loser gets a 409.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{is_conflict, is_not_found};
use crate::Error;

/// Lease name shared by all operator replicas
pub const LEADER_LEASE_NAME: &str = "opentelemetry-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What this replica should do with the lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    /// No lease exists yet; create it
    Create,
    /// We hold it; bump renewTime
    Renew,
    /// Holder is gone or expired; take it over with the next transition count
    TakeOver {
        /// Value for `leaseTransitions` after the takeover
        transitions: i32,
    },
    /// Someone else holds a live lease
    Wait,
}

/// Decide how to treat `lease` as seen by `identity` at `now`.
pub fn lease_action(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = lease else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseAction::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (holder, renew_time, duration) {
        (None, _, _) => true,
        (_, Some(rt), Some(secs)) => now > rt.0 + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    };

    if expired {
        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
        LeaseAction::TakeOver {
            transitions: transitions + 1,
        }
    } else {
        LeaseAction::Wait
    }
}

/// Leader elector for one replica identity
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    /// Create an elector with 30s lease, 10s renew and 5s retry timing
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this replica currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired, then return a guard that keeps renewing it.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership");

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying");
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e.into()),
        };

        let result = match lease_action(existing.as_ref(), &self.identity, now) {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Create => {
                api.create(&PostParams::default(), &self.lease(None, now, 0))
                    .await
            }
            LeaseAction::Renew => {
                let mut updated = existing.clone().unwrap_or_default();
                if let Some(spec) = updated.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                api.replace(&self.lease_name, &PostParams::default(), &updated)
                    .await
            }
            LeaseAction::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.metadata.resource_version);
                api.replace(
                    &self.lease_name,
                    &PostParams::default(),
                    &self.lease(rv, now, transitions),
                )
                .await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!(identity = %self.identity, "Lease changed underneath us");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lease(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    break;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed, leadership lost");
                    break;
                }
            }
        }
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }

    async fn release_lease(&self) -> Result<(), Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let lease = match api.get(&self.lease_name).await {
            Ok(l) => l,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        // A renewTime in the past makes the lease immediately acquirable.
        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": { "resourceVersion": lease.metadata.resource_version },
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            }
        });

        api.patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

/// Holds leadership while alive; renewal stops when dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Clear the lease holder so a standby can take over without waiting for expiry
    pub async fn release_leadership(&self) -> Result<(), Error> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn missing_lease_is_created() {
        assert_eq!(lease_action(None, "pod-a", Utc::now()), LeaseAction::Create);
    }

    #[test]
    fn own_lease_is_renewed() {
        let now = Utc::now();
        let l = lease(Some("pod-a"), now, 0);
        assert_eq!(lease_action(Some(&l), "pod-a", now), LeaseAction::Renew);
    }

    #[test]
    fn live_foreign_lease_waits() {
        let now = Utc::now();
        let l = lease(Some("pod-b"), now - chrono::Duration::seconds(5), 2);
        assert_eq!(lease_action(Some(&l), "pod-a", now), LeaseAction::Wait);
    }

    #[test]
    fn expired_foreign_lease_is_taken_over() {
        let now = Utc::now();
        let l = lease(Some("pod-b"), now - chrono::Duration::seconds(31), 2);
        assert_eq!(
            lease_action(Some(&l), "pod-a", now),
            LeaseAction::TakeOver { transitions: 3 }
        );
    }

    #[test]
    fn released_lease_is_taken_over_immediately() {
        let now = Utc::now();
        let l = lease(None, now, 4);
        assert_eq!(
            lease_action(Some(&l), "pod-a", now),
            LeaseAction::TakeOver { transitions: 5 }
        );
    }
}
