//! The live-status watch hub behind §4.7 "Watching": each run gets a
//! `tokio::sync::watch` channel of [`Run`] snapshots, so a waiter always
//! sees the current status immediately and then lazily wakes on every
//! subsequent change, without missing one in between.
//!
//! A race-free wakeup: interested parties subscribe before checking
//! state, so a change published between the check and the subscribe is
//! never silently missed. `watch` gives this guarantee for a value
//! rather than a bare notification, which is what a run-status snapshot
//! needs.

use std::collections::HashMap;

use tokio::sync::{watch, RwLock};

use tyger_core::Run;

/// Registry of the live watch channel for every run currently tracked by
/// the run coordinator. A run's entry is created on dispatch and removed
/// once the sweep has finished archiving its terminal state (§4.7
/// "Sweep"); watchers already holding a receiver keep working after
/// that, since a `watch::Receiver` only needs its sender to stay alive,
/// tracked by the receiver's own clone rather than by this map.
#[derive(Default)]
pub struct RunWatchHub {
    channels: RwLock<HashMap<u64, watch::Sender<Run>>>,
}

impl RunWatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `run`'s status, creating its channel if this is
    /// the first snapshot seen for its id.
    pub async fn register(&self, run: Run) {
        let mut channels = self.channels.write().await;
        channels
            .entry(run.id)
            .and_modify(|tx| {
                let _ = tx.send(run.clone());
            })
            .or_insert_with(|| watch::channel(run).0);
    }

    /// Publish a new snapshot, waking every subscriber. A no-op if no
    /// one ever registered this run id.
    pub async fn publish(&self, run: Run) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&run.id) {
            let _ = tx.send(run);
        }
    }

    /// Subscribe to `run_id`'s snapshots. The first `.borrow()` or
    /// `.changed()` on the returned receiver immediately sees the
    /// current snapshot; `None` means the run was never registered (or
    /// was already forgotten).
    pub async fn subscribe(&self, run_id: u64) -> Option<watch::Receiver<Run>> {
        self.channels.read().await.get(&run_id).map(|tx| tx.subscribe())
    }

    /// Stop tracking a run. Existing receivers keep their last-seen
    /// snapshot but will never observe another change.
    pub async fn forget(&self, run_id: u64) {
        self.channels.write().await.remove(&run_id);
    }

    pub async fn tracked_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Block until `rx` observes a snapshot, returning it. Used by the
/// control plane's long-poll handler: call once to get the current
/// status, then again (in a loop, bounded by a timeout) to await the
/// next change after a terminal-status check comes back false.
pub async fn next_snapshot(
    rx: &mut watch::Receiver<Run>,
) -> Result<Run, watch::error::RecvError> {
    rx.changed().await?;
    Ok(rx.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyger_core::{CodespecRef, RunCodeTarget, RunKind, RunStatus};

    fn run(id: u64, status: RunStatus) -> Run {
        Run {
            id,
            kind: RunKind::User,
            job: RunCodeTarget {
                codespec: CodespecRef::Named {
                    name: "echo".to_string(),
                    version: None,
                },
                buffers: Default::default(),
                tags: Default::default(),
                buffer_ttl: std::time::Duration::from_secs(3600),
                node_pool: None,
                replicas: None,
            },
            worker: None,
            cluster: None,
            timeout_seconds: None,
            tags: Default::default(),
            buffer_access_ttl: std::time::Duration::from_secs(3600),
            e_tag: "1".to_string(),
            status,
            status_reason: None,
            created_at: tyger_core::zero_timestamp(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn subscribe_before_register_sees_nothing() {
        let hub = RunWatchHub::new();
        assert!(hub.subscribe(1).await.is_none());
    }

    #[tokio::test]
    async fn subscriber_sees_current_snapshot_immediately() {
        let hub = RunWatchHub::new();
        hub.register(run(1, RunStatus::Pending)).await;
        let rx = hub.subscribe(1).await.unwrap();
        assert_eq!(rx.borrow().status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn publish_wakes_a_waiting_subscriber() {
        let hub = RunWatchHub::new();
        hub.register(run(1, RunStatus::Pending)).await;
        let mut rx = hub.subscribe(1).await.unwrap();

        let publisher = async {
            tokio::task::yield_now().await;
            hub.publish(run(1, RunStatus::Running)).await;
        };
        let (_, snapshot) = tokio::join!(publisher, next_snapshot(&mut rx));
        assert_eq!(snapshot.unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn forget_leaves_existing_receivers_on_their_last_value() {
        let hub = RunWatchHub::new();
        hub.register(run(1, RunStatus::Running)).await;
        let rx = hub.subscribe(1).await.unwrap();
        hub.forget(1).await;
        assert_eq!(rx.borrow().status, RunStatus::Running);
        assert!(hub.subscribe(1).await.is_none());
    }

    #[tokio::test]
    async fn tracked_count_reflects_registrations() {
        let hub = RunWatchHub::new();
        assert_eq!(hub.tracked_count().await, 0);
        hub.register(run(1, RunStatus::Pending)).await;
        hub.register(run(2, RunStatus::Pending)).await;
        assert_eq!(hub.tracked_count().await, 2);
        hub.forget(1).await;
        assert_eq!(hub.tracked_count().await, 1);
    }
}
