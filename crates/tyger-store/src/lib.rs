//! The persistence layer shared by the buffer, codespec, and run
//! registries (C5–C7): an in-memory, eTag-guarded [`RecordStore`] backed
//! by an optional [`Durable`] implementation for crash recovery.
//!
//! Split into an in-memory index and an optional durable write-through —
//! a trait abstracting the backend so a future SQL- or blob-backed
//! implementation can swap in without touching call sites — holding many
//! keyed records rather than a single blob, and enforcing optimistic
//! concurrency on writes.

pub mod file;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

pub use file::FileRegistryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("eTag mismatch: expected {expected}, found {found}")]
    ETagMismatch { expected: String, found: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// A record that can participate in optimistic-concurrency writes must
/// expose the eTag it was last persisted with.
pub trait Versioned {
    fn e_tag(&self) -> &str;
}

/// A backend capable of persisting a [`RecordStore`]'s contents to
/// durable storage, keyed the same way the in-memory store is.
#[async_trait]
pub trait Durable<T>: Send + Sync {
    async fn persist(&self, key: &str, value: &T) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<(String, T)>, StoreError>;
}

/// An in-memory, sorted map of records guarded by a single `RwLock`,
/// with an optional durable backend written through on every mutation.
///
/// The write lock is held across the durable write: this is the CAS
/// critical section, not incidental scope creep — without it, two
/// concurrent writers could both pass the eTag check and one silently
/// lose its update.
pub struct RecordStore<T> {
    entries: RwLock<BTreeMap<String, Arc<T>>>,
    durable: Option<Arc<dyn Durable<T>>>,
}

impl<T> RecordStore<T>
where
    T: Clone + Versioned + Send + Sync + 'static,
{
    pub fn new(durable: Option<Arc<dyn Durable<T>>>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            durable,
        }
    }

    /// Build a store by replaying everything the durable backend already
    /// has on disk, e.g. on server startup.
    pub async fn load(durable: Arc<dyn Durable<T>>) -> Result<Self, StoreError> {
        let items = durable.load_all().await?;
        let mut entries = BTreeMap::new();
        for (key, value) in items {
            entries.insert(key, Arc::new(value));
        }
        Ok(Self {
            entries: RwLock::new(entries),
            durable: Some(durable),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<T>> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Keys in ascending sort order, the ordering pagination cursors rely
    /// on to resume a listing at the row after the last one returned.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Insert or replace `key`. When `expected_etag` is `Some`, the write
    /// only applies if the stored record's current eTag matches;
    /// `None` requires the key be absent (a create).
    pub async fn put(
        &self,
        key: &str,
        value: T,
        expected_etag: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        match (entries.get(key), expected_etag) {
            (Some(current), Some(expected)) if current.e_tag() != expected => {
                return Err(StoreError::ETagMismatch {
                    expected: expected.to_string(),
                    found: current.e_tag().to_string(),
                });
            }
            (None, Some(_)) => return Err(StoreError::NotFound),
            _ => {}
        }
        if let Some(durable) = &self.durable {
            durable.persist(key, &value).await?;
        }
        entries.insert(key.to_string(), Arc::new(value));
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(durable) = &self.durable {
            durable.remove(key).await?;
        }
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Rec {
        e_tag: String,
        value: u32,
    }

    impl Versioned for Rec {
        fn e_tag(&self) -> &str {
            &self.e_tag
        }
    }

    #[tokio::test]
    async fn create_without_etag_then_list() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        store
            .put(
                "a",
                Rec {
                    e_tag: "1".into(),
                    value: 10,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(store.get("a").await.unwrap().value, 10);
    }

    #[tokio::test]
    async fn stale_etag_is_rejected() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        store
            .put(
                "a",
                Rec {
                    e_tag: "1".into(),
                    value: 10,
                },
                None,
            )
            .await
            .unwrap();
        let err = store
            .put(
                "a",
                Rec {
                    e_tag: "2".into(),
                    value: 20,
                },
                Some("stale"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ETagMismatch { .. }));
        assert_eq!(store.get("a").await.unwrap().value, 10);
    }

    #[tokio::test]
    async fn matching_etag_applies_update() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        store
            .put(
                "a",
                Rec {
                    e_tag: "1".into(),
                    value: 10,
                },
                None,
            )
            .await
            .unwrap();
        store
            .put(
                "a",
                Rec {
                    e_tag: "2".into(),
                    value: 20,
                },
                Some("1"),
            )
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().value, 20);
    }

    #[tokio::test]
    async fn create_on_existing_key_without_etag_overwrites() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        store
            .put(
                "a",
                Rec {
                    e_tag: "1".into(),
                    value: 10,
                },
                None,
            )
            .await
            .unwrap();
        store
            .put(
                "a",
                Rec {
                    e_tag: "2".into(),
                    value: 99,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().value, 99);
    }

    #[tokio::test]
    async fn update_with_etag_on_missing_key_is_not_found() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        let err = store
            .put(
                "missing",
                Rec {
                    e_tag: "1".into(),
                    value: 1,
                },
                Some("1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn remove_drops_the_key() {
        let store: RecordStore<Rec> = RecordStore::new(None);
        store
            .put(
                "a",
                Rec {
                    e_tag: "1".into(),
                    value: 1,
                },
                None,
            )
            .await
            .unwrap();
        store.remove("a").await.unwrap();
        assert!(store.get("a").await.is_none());
    }
}
