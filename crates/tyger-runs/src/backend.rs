//! The seam between run orchestration and whatever actually schedules
//! pods (Kubernetes, a local process pool, a test double). A small
//! async trait hides every backend detail behind a handful of verbs, so
//! the coordinator in [`crate::coordinator`] never imports a scheduler
//! SDK directly.

use async_trait::async_trait;

use tyger_core::{LogRecord, Run, TygerError};

/// What the sweep's run finalizer (§4.7 "Sweep") observes when it asks
/// whether a `Running` run's backend resources still exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPresence {
    /// The pod or endpoint is still there; leave the run as `Running`.
    Present,
    /// Gone, and the backend's own bookkeeping says it finished cleanly.
    GoneSucceeded,
    /// Gone, and the backend's own bookkeeping says it finished in error.
    GoneFailed,
}

/// Everything the run coordinator needs from whatever actually runs a
/// job: dispatching it, signaling cancellation, polling whether it's
/// still alive, and pulling its logs once it has finished.
#[async_trait]
pub trait BackendHandle: Send + Sync {
    /// Submit `run` for execution. Errors here fail the run outright
    /// (status `Failed`, not retried by the coordinator itself).
    async fn dispatch(&self, run: &Run) -> Result<(), TygerError>;

    /// Request cancellation. Per §4.7: if the pod had started, send
    /// SIGINT so the container can mark its own output buffer
    /// completed; otherwise the backend marks the buffer failed
    /// directly. That distinction is the backend's to make — this
    /// trait only carries the request across the seam.
    async fn signal_cancel(&self, run: &Run) -> Result<(), TygerError>;

    /// Whether `run_id`'s backend resources (pod, endpoint) still
    /// exist, and if not, how it ended.
    async fn poll_presence(&self, run_id: u64) -> Result<BackendPresence, TygerError>;

    /// Pull the final merged log lines for a terminated run, for the
    /// sweep's log archiver to persist. Called at most once per run.
    async fn fetch_final_logs(&self, run_id: u64) -> Result<Vec<LogRecord>, TygerError>;
}

/// An in-memory [`BackendHandle`] for tests: dispatch always succeeds,
/// presence and logs are whatever the test pre-seeds, keyed by run id.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeBackend {
        presence: Mutex<BTreeMap<u64, BackendPresence>>,
        logs: Mutex<BTreeMap<u64, Vec<LogRecord>>>,
        dispatched: Mutex<Vec<u64>>,
        cancel_signals: Mutex<Vec<u64>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_presence(&self, run_id: u64, presence: BackendPresence) {
            self.presence.lock().unwrap().insert(run_id, presence);
        }

        pub fn set_logs(&self, run_id: u64, logs: Vec<LogRecord>) {
            self.logs.lock().unwrap().insert(run_id, logs);
        }

        pub fn dispatched_ids(&self) -> Vec<u64> {
            self.dispatched.lock().unwrap().clone()
        }

        pub fn cancel_signaled_ids(&self) -> Vec<u64> {
            self.cancel_signals.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BackendHandle for FakeBackend {
        async fn dispatch(&self, run: &Run) -> Result<(), TygerError> {
            self.dispatched.lock().unwrap().push(run.id);
            self.presence.lock().unwrap().entry(run.id).or_insert(BackendPresence::Present);
            Ok(())
        }

        async fn signal_cancel(&self, run: &Run) -> Result<(), TygerError> {
            self.cancel_signals.lock().unwrap().push(run.id);
            Ok(())
        }

        async fn poll_presence(&self, run_id: u64) -> Result<BackendPresence, TygerError> {
            Ok(self.presence.lock().unwrap().get(&run_id).copied().unwrap_or(BackendPresence::Present))
        }

        async fn fetch_final_logs(&self, run_id: u64) -> Result<Vec<LogRecord>, TygerError> {
            Ok(self.logs.lock().unwrap().get(&run_id).cloned().unwrap_or_default())
        }
    }
}
