//! The run coordinator itself (§4.7): `create` resolves a codespec and
//! its buffer bindings then dispatches asynchronously; `cancel` and
//! `sweep` drive the rest of the status machine forward as the backend
//! reports progress.
//!
//! Create dispatches asynchronously and returns immediately; the run's
//! status then evolves independently as the backend reports progress,
//! rather than blocking the caller on a fixed batch running to
//! completion.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use tyger_core::{BufferParameter, Run, RunCodeTarget, RunKind, RunStatus, TygerError};
use tyger_logstore::{ArchivedLine, LogArchive};
use tyger_registry::{BufferRegistry, CodespecRegistry, TagFilters};
use tyger_runstate::RunWatchHub;
use tyger_store::{Durable, RecordStore, StoreError, Versioned};

use crate::backend::{BackendHandle, BackendPresence};
use crate::types::{declared_buffer_names, resolve_codespec, RunCodeTargetSpec, RunCreateSpec};

/// Wraps [`Run`] for the same orphan-rule reason [`tyger_registry`]
/// wraps `Buffer`: `tyger-core` owns no dependency on the storage crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunRecord(pub Run);

impl Versioned for RunRecord {
    fn e_tag(&self) -> &str {
        &self.0.e_tag
    }
}

/// Zero-padded so lexicographic key order (what `RecordStore` sorts by)
/// matches numeric run-id order.
fn run_key(id: u64) -> String {
    format!("{id:020}")
}

fn map_store_err(err: StoreError, id: u64) -> TygerError {
    match err {
        StoreError::NotFound => TygerError::NotFound { kind: "Run", id: id.to_string() },
        StoreError::ETagMismatch { expected, found } => TygerError::ETagMismatch { expected, found },
        StoreError::Io(e) | StoreError::Serde(e) => TygerError::Backend(e),
    }
}

fn next_revision(previous_etag: &str) -> u64 {
    previous_etag.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

fn tags_match(tags: &BTreeMap<String, String>, filters: &TagFilters) -> bool {
    let superset = filters.include.iter().all(|(k, v)| tags.get(k) == Some(v));
    let excluded = filters.exclude.iter().any(|(k, v)| tags.get(k) == Some(v));
    superset && !excluded
}

pub struct RunCoordinator {
    runs: Arc<RecordStore<RunRecord>>,
    buffers: Arc<BufferRegistry>,
    codespecs: Arc<CodespecRegistry>,
    watch_hub: Arc<RunWatchHub>,
    log_archive: Arc<LogArchive>,
    backend: Arc<dyn BackendHandle>,
    next_id: AtomicU64,
    archived: Mutex<HashSet<u64>>,
}

impl RunCoordinator {
    pub fn new(
        durable: Option<Arc<dyn Durable<RunRecord>>>,
        buffers: Arc<BufferRegistry>,
        codespecs: Arc<CodespecRegistry>,
        watch_hub: Arc<RunWatchHub>,
        log_archive: Arc<LogArchive>,
        backend: Arc<dyn BackendHandle>,
    ) -> Self {
        Self {
            runs: Arc::new(RecordStore::new(durable)),
            buffers,
            codespecs,
            watch_hub,
            log_archive,
            backend,
            next_id: AtomicU64::new(1),
            archived: Mutex::new(HashSet::new()),
        }
    }

    /// §4.7 "Creation": resolve, validate, allocate, persist, dispatch.
    /// Returns the run with `status = Pending`; dispatch happens on a
    /// spawned task so `create` itself never blocks on the backend.
    pub async fn create(&self, spec: RunCreateSpec, now: DateTime<Utc>) -> Result<Run, TygerError> {
        let job = self.resolve_target(&spec.job, &spec.tags, now).await?;
        let worker = match &spec.worker {
            Some(w) => Some(self.resolve_target(w, &spec.tags, now).await?),
            None => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut run = Run {
            id,
            kind: spec.kind,
            job,
            worker,
            cluster: spec.cluster,
            timeout_seconds: spec.timeout_seconds,
            tags: spec.tags,
            buffer_access_ttl: spec.buffer_access_ttl,
            e_tag: String::new(),
            status: RunStatus::Pending,
            status_reason: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };
        run.e_tag = tyger_core::fresh_etag(&run, 0)?;

        self.runs
            .put(&run_key(id), RunRecord(run.clone()), None)
            .await
            .map_err(|e| map_store_err(e, id))?;
        self.watch_hub.register(run.clone()).await;

        let dispatch = DispatchHandle {
            runs: self.runs.clone(),
            watch_hub: self.watch_hub.clone(),
            backend: self.backend.clone(),
        };
        let dispatched = run.clone();
        tokio::spawn(async move { dispatch.dispatch(dispatched).await });

        Ok(run)
    }

    /// `cancel()`: valid only from `Pending`/`Running`; idempotent while
    /// already `Canceling`. Terminating output buffers is the backend's
    /// job (§4.7), signaled here via [`BackendHandle::signal_cancel`].
    pub async fn cancel(&self, id: u64, now: DateTime<Utc>) -> Result<Run, TygerError> {
        let current = self.get(id).await?;
        if current.status == RunStatus::Canceling {
            return Ok(current);
        }
        if !current.status.cancelable() {
            return Err(TygerError::InvalidState(format!(
                "run {id} cannot be canceled from status {}",
                current.status
            )));
        }

        let mut updated = current.clone();
        updated.status = RunStatus::Canceling;
        updated.status_reason = Some("Canceled by user".to_string());
        updated.e_tag = tyger_core::fresh_etag(&updated, next_revision(&current.e_tag))?;
        self.runs
            .put(&run_key(id), RunRecord(updated.clone()), Some(&current.e_tag))
            .await
            .map_err(|e| map_store_err(e, id))?;
        self.watch_hub.publish(updated.clone()).await;

        self.backend.signal_cancel(&updated).await?;
        Ok(updated)
    }

    pub async fn get(&self, id: u64) -> Result<Run, TygerError> {
        self.runs
            .get(&run_key(id))
            .await
            .map(|r| r.0.clone())
            .ok_or(TygerError::NotFound { kind: "Run", id: id.to_string() })
    }

    /// §4.7 "Watching": the current snapshot immediately, then one per
    /// transition, via the shared [`RunWatchHub`].
    pub async fn watch(&self, id: u64) -> Option<watch::Receiver<Run>> {
        self.watch_hub.subscribe(id).await
    }

    pub async fn list(
        &self,
        since: Option<DateTime<Utc>>,
        filters: &TagFilters,
        statuses: Option<&[RunStatus]>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<tyger_core::Page<Run>, TygerError> {
        let after = cursor.map(tyger_core::decode_cursor).transpose()?;
        let keys = self.runs.keys().await;

        let mut items = Vec::with_capacity(limit);
        let mut last_key = None;
        for key in keys {
            if let Some(after) = &after {
                if key.as_str() <= after.as_str() {
                    continue;
                }
            }
            let Some(record) = self.runs.get(&key).await else { continue };
            let run = &record.0;
            if let Some(since) = since {
                if run.created_at < since {
                    continue;
                }
            }
            if let Some(statuses) = statuses {
                if !statuses.contains(&run.status) {
                    continue;
                }
            }
            if !tags_match(&run.tags, filters) {
                continue;
            }
            if items.len() == limit {
                break;
            }
            last_key = Some(key.clone());
            items.push(run.clone());
        }

        let next_link = match (&last_key, items.len() == limit) {
            (Some(key), true) => Some(tyger_core::encode_cursor(key)),
            _ => None,
        };
        Ok(tyger_core::Page { items, next_link })
    }

    pub async fn count(
        &self,
        since: Option<DateTime<Utc>>,
        filters: &TagFilters,
        statuses: Option<&[RunStatus]>,
    ) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for key in self.runs.keys().await {
            let Some(record) = self.runs.get(&key).await else { continue };
            let run = &record.0;
            if let Some(since) = since {
                if run.created_at < since {
                    continue;
                }
            }
            if let Some(statuses) = statuses {
                if !statuses.contains(&run.status) {
                    continue;
                }
            }
            if !tags_match(&run.tags, filters) {
                continue;
            }
            *counts.entry(run.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// §4.7 "Sweep": archive logs for newly terminal runs, finalize
    /// `Running`/`Canceling` runs whose backend presence is gone.
    /// Idempotent — a run is archived at most once, tracked in
    /// `self.archived`, and finalization only acts on non-terminal runs.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(), TygerError> {
        for key in self.runs.keys().await {
            let Some(record) = self.runs.get(&key).await else { continue };
            let run = record.0.clone();

            if run.status.is_terminal() {
                self.archive_if_needed(&run).await?;
                continue;
            }

            if matches!(run.status, RunStatus::Running | RunStatus::Canceling) {
                let presence = self.backend.poll_presence(run.id).await?;
                if presence != BackendPresence::Present {
                    self.finalize_run(run, presence, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn archive_if_needed(&self, run: &Run) -> Result<(), TygerError> {
        let mut archived = self.archived.lock().await;
        if archived.contains(&run.id) || self.log_archive.exists(run.id) {
            archived.insert(run.id);
            self.watch_hub.forget(run.id).await;
            return Ok(());
        }
        let records = self.backend.fetch_final_logs(run.id).await?;
        let lines: Vec<ArchivedLine> = records.iter().map(ArchivedLine::from).collect();
        let archive = self.log_archive.clone();
        let run_id = run.id;
        tokio::task::spawn_blocking(move || archive.append(run_id, &lines))
            .await
            .map_err(|e| TygerError::Backend(e.to_string()))?
            .map_err(|e| TygerError::Backend(e.to_string()))?;
        archived.insert(run.id);
        self.watch_hub.forget(run.id).await;
        Ok(())
    }

    async fn finalize_run(&self, run: Run, presence: BackendPresence, now: DateTime<Utc>) -> Result<(), TygerError> {
        let final_status = match (run.status, presence) {
            (RunStatus::Canceling, _) => RunStatus::Canceled,
            (_, BackendPresence::GoneSucceeded) => RunStatus::Succeeded,
            (_, BackendPresence::GoneFailed) => RunStatus::Failed,
            (_, BackendPresence::Present) => return Ok(()),
        };
        let mut updated = run.clone();
        updated.status = final_status;
        updated.finished_at = Some(now);
        updated.e_tag = tyger_core::fresh_etag(&updated, next_revision(&run.e_tag))?;
        self.runs
            .put(&run_key(run.id), RunRecord(updated.clone()), Some(&run.e_tag))
            .await
            .map_err(|e| map_store_err(e, run.id))?;
        self.watch_hub.publish(updated).await;
        Ok(())
    }

    async fn resolve_target(
        &self,
        target: &RunCodeTargetSpec,
        run_tags: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<RunCodeTarget, TygerError> {
        let codespec = resolve_codespec(&target.codespec, &self.codespecs).await?;
        let declared = declared_buffer_names(&codespec);

        let mut resolved_buffers = BTreeMap::new();
        for name in declared {
            let binding = target
                .buffers
                .get(&name)
                .ok_or_else(|| TygerError::InvalidArgument(format!("missing buffer binding for '{name}'")))?;
            let resolved = match binding {
                BufferParameter::Auto => {
                    let buffer = self
                        .buffers
                        .create(run_tags.clone(), None, Some(target.buffer_ttl), now)
                        .await?;
                    BufferParameter::Existing(buffer.id)
                }
                BufferParameter::Ephemeral => BufferParameter::Ephemeral,
                BufferParameter::Existing(id) => {
                    self.buffers.get(id, false).await?;
                    BufferParameter::Existing(id.clone())
                }
            };
            resolved_buffers.insert(name, resolved);
        }

        Ok(RunCodeTarget {
            codespec: tyger_core::CodespecRef::Named { name: codespec.name.clone(), version: Some(codespec.version) },
            buffers: resolved_buffers,
            tags: target.tags.clone(),
            buffer_ttl: target.buffer_ttl,
            node_pool: target.node_pool.clone(),
            replicas: target.replicas,
        })
    }

}

/// The pieces a spawned dispatch task needs, held independently of
/// `RunCoordinator` itself so the task outlives the `create` call that
/// spawned it.
struct DispatchHandle {
    runs: Arc<RecordStore<RunRecord>>,
    watch_hub: Arc<RunWatchHub>,
    backend: Arc<dyn BackendHandle>,
}

impl DispatchHandle {
    async fn dispatch(&self, run: Run) {
        let outcome = self.backend.dispatch(&run).await;

        let mut updated = run.clone();
        match outcome {
            Ok(()) => {
                updated.status = RunStatus::Running;
                updated.started_at = Some(updated.created_at);
            }
            Err(e) => {
                updated.status = RunStatus::Failed;
                updated.status_reason = Some(e.to_string());
                updated.finished_at = Some(updated.created_at);
            }
        }
        updated.e_tag = match tyger_core::fresh_etag(&updated, next_revision(&run.e_tag)) {
            Ok(tag) => tag,
            Err(_) => return,
        };

        if self.runs.put(&run_key(run.id), RunRecord(updated.clone()), Some(&run.e_tag)).await.is_ok() {
            self.watch_hub.publish(updated).await;
        }
    }
}
