//! Singleton election
//!
//! Some kinds are meant to exist once per cluster while the API happily
//! accepts several. Every reconcile of any instance re-runs [`elect`] over
//! the freshly listed live instances, so when the winner goes away the next
//! reconcile promotes a successor without any lock or lease.

use chrono::{DateTime, Utc};

/// One live instance of a singleton-typed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingletonCandidate {
    /// Namespace of the instance
    pub namespace: String,
    /// Name of the instance
    pub name: String,
    /// Cluster-assigned identity
    pub uid: String,
    /// When the instance was created
    pub creation_timestamp: DateTime<Utc>,
}

impl SingletonCandidate {
    /// `namespace/name`, the tie-breaker and the identity reported to users
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Outcome of an election as seen by one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    /// The active instance
    pub winner: SingletonCandidate,
    /// Whether the instance asking is the winner
    pub is_winner: bool,
    /// Every other candidate, in election order
    pub losers: Vec<SingletonCandidate>,
}

/// Elect the active instance among `candidates`.
///
/// Earliest creation timestamp wins; identical timestamps are broken by
/// ascending `namespace/name`. The result does not depend on input order.
/// `this` is the `namespace/name` of the instance asking. Returns `None`
/// when there are no candidates.
pub fn elect(candidates: &[SingletonCandidate], this: &str) -> Option<Election> {
    let mut ordered: Vec<&SingletonCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.key().cmp(&b.key()))
    });

    let (winner, rest) = ordered.split_first()?;
    Some(Election {
        is_winner: winner.key() == this,
        winner: (*winner).clone(),
        losers: rest.iter().map(|c| (*c).clone()).collect(),
    })
}
