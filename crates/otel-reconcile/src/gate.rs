//! Per-key single-flight gate
//!
//! The controller runtime already avoids running two reconciles for one
//! object at once; this gate makes the guarantee hold for every entry point
//! (capability-triggered resyncs, finalizer cleanup) that reaches the engine.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutex per key. A second caller for the same key waits for the
/// first to finish; callers for different keys never block each other.
#[derive(Default)]
pub struct KeyedGate {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held while a reconcile for one key is in flight
pub struct GateGuard<'a> {
    gate: &'a KeyedGate,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> GateGuard<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        GateGuard {
            gate: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key currently has a lock entry
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map and this guard's released mutex hold the Arc when
        // nobody else is waiting; then the entry can go.
        self.gate
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_never_runs_concurrently() {
        let gate = Arc::new(KeyedGate::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                let running = running.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    let _guard = gate.acquire("observability/otel").await;
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(gate.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let gate = KeyedGate::new();
        let _a = gate.acquire("ns/a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), gate.acquire("ns/b")).await;
        assert!(b.is_ok());
        assert_eq!(gate.len(), 2);
    }
}
