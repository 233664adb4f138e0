// src/engine/groups.rs

//! Concurrency groups: at most one live run per `(event kind, branch)`.
//!
//! Registering a run under a key that already has a live run sends that run a
//! `CancelRequested` event. The older run then winds down through the normal
//! cancellation path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::RuntimeEvent;

#[derive(Debug)]
struct LiveRun {
    run_id: u64,
    events: mpsc::Sender<RuntimeEvent>,
}

/// Result of registering a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRegistration {
    pub run_id: u64,
    /// The run this one replaced, if any.
    pub superseded: Option<u64>,
}

#[derive(Debug)]
pub struct ConcurrencyGroups {
    live: Mutex<HashMap<String, LiveRun>>,
    next_run_id: AtomicU64,
}

impl Default for ConcurrencyGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyGroups {
    /// Run ids start from a per-process seed, so two `cidag` processes
    /// sharing a work dir never pick the same `run-<id>` directory.
    pub fn new() -> Self {
        Self::with_first_run_id(process_seed())
    }

    /// Start numbering at `first`.
    pub fn with_first_run_id(first: u64) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(first.max(1) - 1),
        }
    }

    /// Register a new run under `key`, superseding any live run there.
    pub async fn register(&self, key: &str, events: mpsc::Sender<RuntimeEvent>) -> RunRegistration {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = {
            let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
            live.insert(key.to_string(), LiveRun { run_id, events })
        };

        let superseded = match previous {
            Some(old) => {
                info!(key, old_run = old.run_id, new_run = run_id, "superseding live run");
                let reason = format!("superseded by run {run_id}");
                if old
                    .events
                    .send(RuntimeEvent::CancelRequested { reason })
                    .await
                    .is_err()
                {
                    debug!(old_run = old.run_id, "superseded run already finished");
                }
                Some(old.run_id)
            }
            None => None,
        };

        RunRegistration { run_id, superseded }
    }

    /// Drop the registration for `key` if it still belongs to `run_id`.
    pub fn release(&self, key: &str, run_id: u64) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        if live.get(key).is_some_and(|r| r.run_id == run_id) {
            live.remove(key);
        }
    }

    pub fn live_run(&self, key: &str) -> Option<u64> {
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.get(key).map(|r| r.run_id)
    }
}

/// Process id in the high bits, seconds since the epoch in the low bits.
fn process_seed() -> u64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (u64::from(std::process::id()) << 32) | (secs & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newer_run_cancels_older() {
        let groups = ConcurrencyGroups::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        let first = groups.register("pull_request:main", tx1).await;
        assert_eq!(first.superseded, None);

        let second = groups.register("pull_request:main", tx2).await;
        assert_eq!(second.superseded, Some(first.run_id));
        assert!(matches!(
            rx1.recv().await,
            Some(RuntimeEvent::CancelRequested { .. })
        ));
        assert_eq!(groups.live_run("pull_request:main"), Some(second.run_id));

        // Releasing the old run leaves the new registration alone.
        groups.release("pull_request:main", first.run_id);
        assert_eq!(groups.live_run("pull_request:main"), Some(second.run_id));
        groups.release("pull_request:main", second.run_id);
        assert_eq!(groups.live_run("pull_request:main"), None);
    }

    #[tokio::test]
    async fn different_keys_do_not_interfere() {
        let groups = ConcurrencyGroups::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        groups.register("push:main", tx1).await;
        let r = groups.register("push:dev", tx2).await;
        assert_eq!(r.superseded, None);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_ids_count_up_from_first() {
        let groups = ConcurrencyGroups::with_first_run_id(7);
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(groups.register("push:main", tx.clone()).await.run_id, 7);
        assert_eq!(groups.register("push:dev", tx).await.run_id, 8);
    }

    #[test]
    fn seed_carries_the_process_id() {
        assert_eq!(process_seed() >> 32, u64::from(std::process::id()));
        assert_ne!(process_seed(), 0);
    }
}
