//! The buffer registry (C5, §4.5): create/get/set/list/delete/restore
//! and purge-scheduling over [`Buffer`] records, backed by
//! [`tyger_store::RecordStore`] for eTag-guarded optimistic
//! concurrency.
//!
//! Generalized from a single global record to many
//! independently-versioned ones; the same double-checked-locking
//! discipline a file lock would use around its critical section
//! reappears here as the CAS critical section `RecordStore::put`
//! already holds.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tyger_core::{fresh_etag, Buffer, BufferState, Page, TygerError};
use tyger_store::{Durable, RecordStore, StoreError, Versioned};

/// Wraps [`Buffer`] so this crate — rather than `tyger-core` — takes on
/// the dependency on the storage layer's `Versioned` trait; `tyger-core`
/// stays a pure domain crate with no sibling-crate dependencies besides
/// `tyger-duration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferRecord(pub Buffer);

impl Versioned for BufferRecord {
    fn e_tag(&self) -> &str {
        &self.0.e_tag
    }
}

fn map_store_err(err: StoreError, id: &str) -> TygerError {
    match err {
        StoreError::NotFound => TygerError::NotFound { kind: "Buffer", id: id.to_string() },
        StoreError::ETagMismatch { expected, found } => TygerError::ETagMismatch { expected, found },
        StoreError::Io(e) | StoreError::Serde(e) => TygerError::Backend(e),
    }
}

/// A short, lowercase-hex buffer id. Collision odds are astronomically
/// low for this service's working set; `rand::random` is enough here,
/// the same as for jitter, without needing a CSPRNG.
fn generate_buffer_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Tag-patch semantics for [`BufferRegistry::set`]: `None` on a key
/// removes that tag, `Some` sets/overwrites it.
#[derive(Debug, Clone, Default)]
pub struct BufferPatch {
    pub clear_tags: bool,
    pub tag_patches: BTreeMap<String, Option<String>>,
    pub ttl: Option<std::time::Duration>,
    /// Whether this `set` may target a soft-deleted buffer.
    pub allow_soft_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TagFilters {
    pub include: BTreeMap<String, String>,
    pub exclude: BTreeMap<String, String>,
}

/// FIFO queue of buffer ids awaiting the purger (C8); storage deletion
/// and final record removal happen outside this crate, in
/// `tyger-sweep`, which only needs to know *which* ids are due.
#[derive(Default)]
pub struct PurgeQueue {
    pending: Mutex<VecDeque<String>>,
}

impl PurgeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, id: impl Into<String>) {
        self.pending.lock().await.push_back(id.into());
    }

    /// Pop up to `max` ids, in enqueue order.
    pub async fn dequeue_batch(&self, max: usize) -> Vec<String> {
        let mut pending = self.pending.lock().await;
        let n = max.min(pending.len());
        pending.drain(..n).collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct BufferRegistry {
    store: RecordStore<BufferRecord>,
    purge_queue: Arc<PurgeQueue>,
}

impl BufferRegistry {
    pub fn new(durable: Option<Arc<dyn Durable<BufferRecord>>>) -> Self {
        Self { store: RecordStore::new(durable), purge_queue: Arc::new(PurgeQueue::new()) }
    }

    pub async fn load(durable: Arc<dyn Durable<BufferRecord>>) -> Result<Self, TygerError> {
        let store = RecordStore::load(durable).await.map_err(|e| map_store_err(e, ""))?;
        Ok(Self { store, purge_queue: Arc::new(PurgeQueue::new()) })
    }

    pub fn purge_queue(&self) -> Arc<PurgeQueue> {
        self.purge_queue.clone()
    }

    pub async fn create(
        &self,
        tags: BTreeMap<String, String>,
        location: Option<String>,
        ttl: Option<std::time::Duration>,
        now: DateTime<Utc>,
    ) -> Result<Buffer, TygerError> {
        let id = generate_buffer_id();
        let expires_at = ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| now + d);
        let mut buffer = Buffer {
            id: id.clone(),
            created_at: now,
            location,
            tags,
            e_tag: String::new(),
            expires_at,
            state: BufferState::Active,
            soft_deleted_at: None,
            purged_at: None,
        };
        buffer.e_tag = fresh_etag(&buffer, 0)?;
        self.store
            .put(&id, BufferRecord(buffer.clone()), None)
            .await
            .map_err(|e| map_store_err(e, &id))?;
        Ok(buffer)
    }

    pub async fn get(&self, id: &str, include_soft_deleted: bool) -> Result<Buffer, TygerError> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| TygerError::NotFound { kind: "Buffer", id: id.to_string() })?;
        if !record.0.is_visible(include_soft_deleted) {
            return Err(TygerError::NotFound { kind: "Buffer", id: id.to_string() });
        }
        Ok(record.0.clone())
    }

    pub async fn set(
        &self,
        id: &str,
        patch: BufferPatch,
        if_match: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Buffer, TygerError> {
        let current = self.get(id, patch.allow_soft_deleted).await?;
        if let Some(expected) = if_match {
            if expected != current.e_tag {
                return Err(TygerError::ETagMismatch {
                    expected: expected.to_string(),
                    found: current.e_tag.clone(),
                });
            }
        }

        let mut updated = current.clone();
        if patch.clear_tags {
            updated.tags.clear();
        }
        for (k, v) in patch.tag_patches {
            match v {
                Some(value) => {
                    updated.tags.insert(k, value);
                }
                None => {
                    updated.tags.remove(&k);
                }
            }
        }
        if let Some(ttl) = patch.ttl {
            updated.expires_at = chrono::Duration::from_std(ttl).ok().map(|d| now + d);
        }
        updated.e_tag = fresh_etag(&updated, next_revision(&current.e_tag))?;

        self.store
            .put(id, BufferRecord(updated.clone()), Some(&current.e_tag))
            .await
            .map_err(|e| map_store_err(e, id))?;
        Ok(updated)
    }

    pub async fn list(
        &self,
        filters: &TagFilters,
        soft_deleted: bool,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Buffer>, TygerError> {
        let after = cursor.map(tyger_core::decode_cursor).transpose()?;
        let keys = self.store.keys().await;

        let mut items = Vec::with_capacity(limit);
        let mut last_key = None;
        for key in keys {
            if let Some(after) = &after {
                if key.as_str() <= after.as_str() {
                    continue;
                }
            }
            let Some(record) = self.store.get(&key).await else { continue };
            let buffer = &record.0;
            let wanted_state = if soft_deleted { BufferState::SoftDeleted } else { BufferState::Active };
            if buffer.state != wanted_state {
                continue;
            }
            if !buffer.matches_tag_filters(&filters.include, &filters.exclude) {
                continue;
            }
            if items.len() == limit {
                break;
            }
            last_key = Some(key.clone());
            items.push(buffer.clone());
        }

        let next_link = match (&last_key, items.len() == limit) {
            (Some(key), true) => Some(tyger_core::encode_cursor(key)),
            _ => None,
        };
        Ok(Page { items, next_link })
    }

    /// Transition one buffer `Active -> SoftDeleted`.
    pub async fn delete_one(&self, id: &str, now: DateTime<Utc>) -> Result<Buffer, TygerError> {
        self.transition_one(id, BufferState::SoftDeleted, now).await
    }

    pub async fn delete_ids(&self, ids: &[String], now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.delete_one(id, now).await?);
        }
        Ok(out)
    }

    pub async fn delete_by_filter(&self, filters: &TagFilters, now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        let matches = self.matching_active_ids(filters).await;
        self.delete_ids(&matches, now).await
    }

    pub async fn delete_all(&self, now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        self.delete_by_filter(&TagFilters::default(), now).await
    }

    /// Transition one buffer `SoftDeleted -> Active`.
    pub async fn restore_one(&self, id: &str, now: DateTime<Utc>) -> Result<Buffer, TygerError> {
        self.transition_one(id, BufferState::Active, now).await
    }

    pub async fn restore_ids(&self, ids: &[String], now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.restore_one(id, now).await?);
        }
        Ok(out)
    }

    pub async fn restore_by_filter(&self, filters: &TagFilters, now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        let mut matches = Vec::new();
        for key in self.store.keys().await {
            if let Some(record) = self.store.get(&key).await {
                if record.0.state == BufferState::SoftDeleted
                    && record.0.matches_tag_filters(&filters.include, &filters.exclude)
                {
                    matches.push(key);
                }
            }
        }
        self.restore_ids(&matches, now).await
    }

    pub async fn restore_all(&self, now: DateTime<Utc>) -> Result<Vec<Buffer>, TygerError> {
        self.restore_by_filter(&TagFilters::default(), now).await
    }

    /// Enqueue `SoftDeleted` buffers for the purger. Fails
    /// `ErrInvalidState` for any id not currently soft-deleted.
    pub async fn purge_ids(&self, ids: &[String]) -> Result<(), TygerError> {
        for id in ids {
            let current = self.get(id, true).await?;
            if current.state != BufferState::SoftDeleted {
                return Err(TygerError::InvalidState(format!(
                    "buffer {id} must be SoftDeleted to purge, was {}",
                    current.state
                )));
            }
        }
        for id in ids {
            self.purge_queue.enqueue(id.clone()).await;
        }
        Ok(())
    }

    pub async fn purge_by_filter(&self, filters: &TagFilters) -> Result<(), TygerError> {
        let mut matches = Vec::new();
        for key in self.store.keys().await {
            if let Some(record) = self.store.get(&key).await {
                if record.0.state == BufferState::SoftDeleted
                    && record.0.matches_tag_filters(&filters.include, &filters.exclude)
                {
                    matches.push(key);
                }
            }
        }
        self.purge_ids(&matches).await
    }

    pub async fn purge_all(&self) -> Result<(), TygerError> {
        self.purge_by_filter(&TagFilters::default()).await
    }

    /// `Active` buffers whose `expires_at` has passed (§4.8 "Buffer TTL
    /// evictor"): due for the next tick to soft-delete.
    pub async fn due_for_eviction(&self, now: DateTime<Utc>) -> Vec<Buffer> {
        let mut due = Vec::new();
        for key in self.store.keys().await {
            let Some(record) = self.store.get(&key).await else { continue };
            let buffer = &record.0;
            if buffer.state == BufferState::Active {
                if let Some(expires_at) = buffer.expires_at {
                    if expires_at <= now {
                        due.push(buffer.clone());
                    }
                }
            }
        }
        due
    }

    /// `SoftDeleted` buffers whose `expires_at` has passed: due to be
    /// enqueued for the purger. A buffer soft-deleted by `delete()`
    /// rather than TTL expiry carries no `expires_at` and is never swept
    /// here — it waits for an explicit `purge` call instead.
    pub async fn due_for_purge(&self, now: DateTime<Utc>) -> Vec<Buffer> {
        let mut due = Vec::new();
        for key in self.store.keys().await {
            let Some(record) = self.store.get(&key).await else { continue };
            let buffer = &record.0;
            if buffer.state == BufferState::SoftDeleted {
                if let Some(expires_at) = buffer.expires_at {
                    if expires_at <= now {
                        due.push(buffer.clone());
                    }
                }
            }
        }
        due
    }

    /// Called by the purger (C8) once storage objects for `id` are gone:
    /// stamps `purged_at`/`Purged` for the record's final moment, then
    /// removes it outright. Idempotent: a missing id is not an error,
    /// matching the sweep's crash-safety requirement (§4.8).
    pub async fn finalize_purge(&self, id: &str, now: DateTime<Utc>) -> Result<(), TygerError> {
        if let Some(record) = self.store.get(id).await {
            let mut buffer = record.0.clone();
            buffer.state = BufferState::Purged;
            buffer.purged_at = Some(now);
            self.store.remove(id).await.map_err(|e| map_store_err(e, id))?;
        }
        Ok(())
    }

    async fn matching_active_ids(&self, filters: &TagFilters) -> Vec<String> {
        let mut matches = Vec::new();
        for key in self.store.keys().await {
            if let Some(record) = self.store.get(&key).await {
                if record.0.state == BufferState::Active
                    && record.0.matches_tag_filters(&filters.include, &filters.exclude)
                {
                    matches.push(key);
                }
            }
        }
        matches
    }

    async fn transition_one(&self, id: &str, target: BufferState, now: DateTime<Utc>) -> Result<Buffer, TygerError> {
        let current = self.get(id, true).await?;
        if !current.state.can_transition_to(target) {
            return Err(TygerError::InvalidState(format!(
                "buffer {id} cannot transition {} -> {target}",
                current.state
            )));
        }
        let mut updated = current.clone();
        updated.state = target;
        match target {
            BufferState::SoftDeleted => updated.soft_deleted_at = Some(now),
            BufferState::Active => {
                updated.soft_deleted_at = None;
            }
            BufferState::Purged => updated.purged_at = Some(now),
        }
        updated.e_tag = fresh_etag(&updated, next_revision(&current.e_tag))?;
        self.store
            .put(id, BufferRecord(updated.clone()), Some(&current.e_tag))
            .await
            .map_err(|e| map_store_err(e, id))?;
        Ok(updated)
    }
}

/// eTags are content hashes, not counters, so there is no literal
/// "next" revision to parse back out of one; folding the previous
/// eTag's bytes into the new hash's revision input is enough to make
/// two updates that coincidentally produce the same content still earn
/// distinct eTags.
fn next_revision(previous_etag: &str) -> u64 {
    previous_etag.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        tyger_core::zero_timestamp()
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn create_then_get() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(tags(&[("env", "prod")]), None, None, now()).await.unwrap();
        let fetched = reg.get(&buf.id, false).await.unwrap();
        assert_eq!(fetched.id, buf.id);
        assert_eq!(fetched.state, BufferState::Active);
    }

    #[tokio::test]
    async fn get_soft_deleted_is_hidden_unless_requested() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        reg.delete_one(&buf.id, now()).await.unwrap();
        assert!(reg.get(&buf.id, false).await.is_err());
        assert!(reg.get(&buf.id, true).await.is_ok());
    }

    #[tokio::test]
    async fn delete_twice_fails_invalid_state() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        reg.delete_one(&buf.id, now()).await.unwrap();
        let err = reg.delete_one(&buf.id, now()).await.unwrap_err();
        assert!(matches!(err, TygerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn restore_reactivates() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        reg.delete_one(&buf.id, now()).await.unwrap();
        let restored = reg.restore_one(&buf.id, now()).await.unwrap();
        assert_eq!(restored.state, BufferState::Active);
    }

    #[tokio::test]
    async fn set_rejects_stale_if_match() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        let patch = BufferPatch { tag_patches: tags(&[("a", "b")]).into_iter().map(|(k, v)| (k, Some(v))).collect(), ..Default::default() };
        let err = reg.set(&buf.id, patch, Some("stale"), now()).await.unwrap_err();
        assert!(matches!(err, TygerError::ETagMismatch { .. }));
    }

    #[tokio::test]
    async fn set_merges_tags_by_default() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(tags(&[("a", "1")]), None, None, now()).await.unwrap();
        let patch = BufferPatch {
            tag_patches: [("b".to_string(), Some("2".to_string()))].into_iter().collect(),
            ..Default::default()
        };
        let updated = reg.set(&buf.id, patch, None, now()).await.unwrap();
        assert_eq!(updated.tags.get("a").map(String::as_str), Some("1"));
        assert_eq!(updated.tags.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn set_clear_tags_drops_everything_first() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(tags(&[("a", "1")]), None, None, now()).await.unwrap();
        let patch = BufferPatch { clear_tags: true, ..Default::default() };
        let updated = reg.set(&buf.id, patch, None, now()).await.unwrap();
        assert!(updated.tags.is_empty());
    }

    #[tokio::test]
    async fn ttl_zero_means_immediately_expired() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        let patch = BufferPatch { ttl: Some(std::time::Duration::ZERO), ..Default::default() };
        let updated = reg.set(&buf.id, patch, None, now()).await.unwrap();
        assert_eq!(updated.expires_at, Some(now()));
    }

    #[tokio::test]
    async fn list_paginates_by_id_with_cursor() {
        let reg = BufferRegistry::new(None);
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(reg.create(BTreeMap::new(), None, None, now()).await.unwrap().id);
        }
        ids.sort();

        let page1 = reg.list(&TagFilters::default(), false, 2, None).await.unwrap();
        assert_eq!(page1.items.len(), 2);
        assert!(page1.next_link.is_some());

        let cursor = page1.next_link.unwrap();
        let page2 = reg.list(&TagFilters::default(), false, 2, Some(&cursor)).await.unwrap();
        assert_eq!(page2.items.len(), 2);
        assert_ne!(page1.items[0].id, page2.items[0].id);
    }

    #[tokio::test]
    async fn list_filters_by_tags_and_exclusions() {
        let reg = BufferRegistry::new(None);
        reg.create(tags(&[("env", "prod")]), None, None, now()).await.unwrap();
        reg.create(tags(&[("env", "dev")]), None, None, now()).await.unwrap();
        let filters = TagFilters { include: tags(&[("env", "prod")]), exclude: BTreeMap::new() };
        let page = reg.list(&filters, false, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].tags.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    async fn purge_requires_soft_deleted_first() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        let err = reg.purge_ids(&[buf.id.clone()]).await.unwrap_err();
        assert!(matches!(err, TygerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn purge_enqueues_then_finalize_removes_record() {
        let reg = BufferRegistry::new(None);
        let buf = reg.create(BTreeMap::new(), None, None, now()).await.unwrap();
        reg.delete_one(&buf.id, now()).await.unwrap();
        reg.purge_ids(&[buf.id.clone()]).await.unwrap();
        assert_eq!(reg.purge_queue().len().await, 1);

        let batch = reg.purge_queue().dequeue_batch(10).await;
        assert_eq!(batch, vec![buf.id.clone()]);
        reg.finalize_purge(&buf.id, now()).await.unwrap();
        assert!(reg.get(&buf.id, true).await.is_err());
    }

    #[tokio::test]
    async fn due_for_eviction_and_purge_respect_ttl() {
        let reg = BufferRegistry::new(None);
        let past = now() - chrono::Duration::seconds(1);
        let future = now() + chrono::Duration::seconds(3600);

        let expired = reg.create(BTreeMap::new(), None, None, past).await.unwrap();
        reg.set(&expired.id, BufferPatch { ttl: Some(std::time::Duration::ZERO), ..Default::default() }, None, past)
            .await
            .unwrap();
        let not_expired = reg.create(BTreeMap::new(), None, Some(std::time::Duration::from_secs(3600)), now()).await.unwrap();

        let due = reg.due_for_eviction(now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, expired.id);

        reg.delete_one(&expired.id, now()).await.unwrap();
        let due_purge = reg.due_for_purge(now()).await;
        assert_eq!(due_purge.len(), 1);
        assert_eq!(due_purge[0].id, expired.id);

        let _ = future;
        let _ = not_expired;
    }
}
