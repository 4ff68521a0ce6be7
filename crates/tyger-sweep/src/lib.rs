//! Background sweepers (C8, §4.8): three jittered-tick loops layered on
//! top of [`tyger_registry::BufferRegistry`] and
//! [`tyger_runs::RunCoordinator`].
//!
//! Each tick sleeps a jittered interval via `tyger_retry::apply_jitter`
//! wrapping the base duration. Each sweeper is `tokio::spawn`ed as an
//! independent task (§5 "Scheduling model": sweepers run on their own
//! ticking tasks) and returns a [`tokio::task::JoinHandle`] the caller can
//! abort on shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tyger_core::TygerError;
use tyger_registry::BufferRegistry;
use tyger_runs::RunCoordinator;

/// The collaborator that actually reclaims a buffer's storage container.
/// Object-storage deletion is out of scope for the core (spec.md §1's
/// "explicitly out of scope" list); this trait is the seam, mirroring
/// how [`tyger_runs::BackendHandle`] seams off the compute backend.
#[async_trait]
pub trait BufferStorageDeleter: Send + Sync {
    async fn delete_container(&self, buffer_id: &str) -> Result<(), TygerError>;
}

/// A deleter for buffers that never allocated real storage (tests, or a
/// deployment where buffers are purely in-memory during development).
pub struct NoopStorageDeleter;

#[async_trait]
impl BufferStorageDeleter for NoopStorageDeleter {
    async fn delete_container(&self, _buffer_id: &str) -> Result<(), TygerError> {
        Ok(())
    }
}

/// Jitter applied to every sweeper's tick interval, to avoid every
/// replica's timers lining up into a thundering herd against the
/// registry or storage backend.
const TICK_JITTER: f64 = 0.2;

fn jittered_interval(base: Duration) -> Duration {
    tyger_retry::apply_jitter(base, TICK_JITTER)
}

/// The buffer TTL evictor (§4.8): every tick, soft-deletes `Active`
/// buffers whose TTL has elapsed and enqueues elapsed `SoftDeleted`
/// buffers for the purger. `set(ttl=0)` takes effect on the very next
/// tick because this loop, not the `set` call, is what performs the
/// transition — the caller only ever writes `expires_at`.
pub fn spawn_buffer_evictor(buffers: Arc<BufferRegistry>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(jittered_interval(tick)).await;
            let now = Utc::now();

            let to_evict = buffers.due_for_eviction(now).await;
            for buffer in &to_evict {
                match buffers.delete_one(&buffer.id, now).await {
                    Ok(_) => debug!(buffer_id = %buffer.id, "evicted expired buffer"),
                    Err(TygerError::InvalidState(_)) => {
                        // Raced with a concurrent delete/restore; the
                        // buffer is no longer Active, nothing to do.
                    }
                    Err(e) => warn!(buffer_id = %buffer.id, error = %e, "buffer eviction failed"),
                }
            }

            let to_purge = buffers.due_for_purge(now).await;
            if !to_purge.is_empty() {
                let ids: Vec<String> = to_purge.iter().map(|b| b.id.clone()).collect();
                if let Err(e) = buffers.purge_ids(&ids).await {
                    warn!(error = %e, "failed to enqueue expired buffers for purge");
                }
            }
        }
    })
}

/// The buffer purger (§4.8): drains the registry's purge queue with
/// bounded concurrency (the same `tokio::sync::Semaphore`-bounded
/// fan-out [`tyger_dataplane`]'s block writer/reader use for their
/// worker pools). Crash-safe: a buffer stays queued — or, after a crash,
/// stays `SoftDeleted` with no queue entry at all — until this loop
/// both deletes its storage and calls
/// [`BufferRegistry::finalize_purge`], so a restarted server simply
/// re-discovers it via [`BufferRegistry::due_for_purge`] on the
/// evictor's next tick.
pub fn spawn_purger(
    buffers: Arc<BufferRegistry>,
    storage: Arc<dyn BufferStorageDeleter>,
    concurrency: usize,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        loop {
            tokio::time::sleep(jittered_interval(tick)).await;
            let queue = buffers.purge_queue();
            let batch = queue.dequeue_batch(concurrency.max(1)).await;
            if batch.is_empty() {
                continue;
            }

            let mut tasks = Vec::with_capacity(batch.len());
            for id in batch {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let buffers = buffers.clone();
                let storage = storage.clone();
                tasks.push(tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = storage.delete_container(&id).await {
                        warn!(buffer_id = %id, error = %e, "failed to delete buffer storage; will retry");
                        return;
                    }
                    let now = Utc::now();
                    if let Err(e) = buffers.finalize_purge(&id, now).await {
                        warn!(buffer_id = %id, error = %e, "failed to finalize buffer purge");
                    } else {
                        info!(buffer_id = %id, "purged buffer");
                    }
                }));
            }
            for task in tasks {
                let _ = task.await;
            }
        }
    })
}

/// The run finalizer (§4.8): ticks [`RunCoordinator::sweep`], which
/// archives logs for newly terminal runs and advances any `Running`/
/// `Canceling` run whose backend presence has gone away.
pub fn spawn_run_finalizer(runs: Arc<RunCoordinator>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(jittered_interval(tick)).await;
            if let Err(e) = runs.sweep(Utc::now()).await {
                warn!(error = %e, "run sweep failed");
            }
        }
    })
}

/// Every sweeper's `JoinHandle`, held by the server so it can abort all
/// three on shutdown (§9 "Global state": sweeper tasks are process
/// singletons with explicit start/stop).
pub struct Sweepers {
    evictor: JoinHandle<()>,
    purger: JoinHandle<()>,
    run_finalizer: JoinHandle<()>,
}

impl Sweepers {
    pub fn spawn(
        buffers: Arc<BufferRegistry>,
        storage: Arc<dyn BufferStorageDeleter>,
        runs: Arc<RunCoordinator>,
        tick: Duration,
        purge_concurrency: usize,
    ) -> Self {
        Self {
            evictor: spawn_buffer_evictor(buffers.clone(), tick),
            purger: spawn_purger(buffers, storage, purge_concurrency, tick),
            run_finalizer: spawn_run_finalizer(runs, tick),
        }
    }

    /// Stop every sweeper loop. Aborting an already-sleeping task is
    /// immediate; aborting one mid-purge drops its in-flight work (the
    /// purge is safe to resume later because it is crash-safe, see
    /// [`spawn_purger`]).
    pub fn shutdown(self) {
        self.evictor.abort();
        self.purger.abort();
        self.run_finalizer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tyger_logstore::LogArchive;
    use tyger_registry::CodespecRegistry;
    use tyger_runstate::RunWatchHub;
    use tyger_runs::test_support::FakeBackend;

    struct CountingDeleter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BufferStorageDeleter for CountingDeleter {
        async fn delete_container(&self, _buffer_id: &str) -> Result<(), TygerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evictor_soft_deletes_expired_buffers_within_one_tick() {
        let buffers = Arc::new(BufferRegistry::new(None));
        let now = Utc::now();
        let buf = buffers.create(BTreeMap::new(), None, None, now).await.unwrap();
        buffers
            .set(
                &buf.id,
                tyger_registry::BufferPatch { ttl: Some(Duration::ZERO), ..Default::default() },
                None,
                now,
            )
            .await
            .unwrap();

        let handle = spawn_buffer_evictor(buffers.clone(), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let fetched = buffers.get(&buf.id, true).await.unwrap();
        assert_eq!(fetched.state, tyger_core::BufferState::SoftDeleted);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn purger_drains_queue_and_finalizes() {
        let buffers = Arc::new(BufferRegistry::new(None));
        let now = Utc::now();
        let buf = buffers.create(BTreeMap::new(), None, None, now).await.unwrap();
        buffers.delete_one(&buf.id, now).await.unwrap();
        buffers.purge_ids(&[buf.id.clone()]).await.unwrap();

        let deleter = Arc::new(CountingDeleter { calls: AtomicUsize::new(0) });
        let handle = spawn_purger(buffers.clone(), deleter.clone(), 4, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(deleter.calls.load(Ordering::SeqCst), 1);
        assert!(buffers.get(&buf.id, true).await.is_err());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn run_finalizer_sweeps_on_a_tick() {
        let backend = Arc::new(FakeBackend::new());
        let buffers = Arc::new(BufferRegistry::new(None));
        let codespecs = Arc::new(CodespecRegistry::new(None));
        let watch_hub = Arc::new(RunWatchHub::new());
        let dir = tempfile::tempdir().unwrap();
        let log_archive = Arc::new(LogArchive::new(dir.path()));
        let coordinator = Arc::new(RunCoordinator::new(
            None,
            buffers,
            codespecs.clone(),
            watch_hub,
            log_archive,
            backend.clone(),
        ));

        codespecs
            .put(tyger_core::Codespec {
                name: "echo".to_string(),
                version: 0,
                image: "busybox".to_string(),
                command: vec![],
                args: vec![],
                working_dir: None,
                env: BTreeMap::new(),
                identity: None,
                resources: tyger_core::Resources::default(),
                max_replicas: None,
                variant: tyger_core::CodespecVariant::Job {
                    buffers: tyger_core::CodespecBuffers::default(),
                    sockets: vec![],
                },
            })
            .await
            .unwrap();

        let run = coordinator
            .create(
                tyger_runs::RunCreateSpec {
                    kind: tyger_core::RunKind::User,
                    job: tyger_runs::RunCodeTargetSpec {
                        codespec: tyger_core::CodespecRef::Named { name: "echo".to_string(), version: None },
                        buffers: BTreeMap::new(),
                        tags: BTreeMap::new(),
                        buffer_ttl: Duration::from_secs(3600),
                        node_pool: None,
                        replicas: None,
                    },
                    worker: None,
                    cluster: None,
                    timeout_seconds: None,
                    tags: BTreeMap::new(),
                    buffer_access_ttl: Duration::from_secs(3600),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        // Let the coordinator's spawned dispatch task move the run
        // from Pending to Running before the backend reports it gone.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(coordinator.get(run.id).await.unwrap().status, tyger_core::RunStatus::Running);
        backend.set_presence(run.id, tyger_runs::BackendPresence::GoneSucceeded);

        let handle = spawn_run_finalizer(coordinator.clone(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let finalized = coordinator.get(run.id).await.unwrap();
        assert_eq!(finalized.status, tyger_core::RunStatus::Succeeded);
        handle.abort();
    }
}
