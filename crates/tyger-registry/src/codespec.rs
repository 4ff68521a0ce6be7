//! The codespec registry (C6, §4.6): content-addressed `put`/`get`/
//! `list` over append-only version histories, one per name.
//!
//! A codespec has no `ifMatch`-guarded mutation path — `put` only ever
//! appends a new version or returns an existing one — so this crate
//! keeps its own version-history store rather than routing through
//! [`tyger_store::RecordStore`]'s CAS semantics, which exist for
//! records that *can* be overwritten. `Durable` is reused as-is: one
//! JSON blob per name, the whole version history, the same durability
//! shape of a small in-memory index with an optional durable backing store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tyger_core::{validate_codespec_name, Codespec, Page, TygerError};
use tyger_store::{Durable, RecordStore, StoreError, Versioned};

/// Every version of a codespec ever `put` under one name, newest last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodespecHistory {
    pub versions: Vec<Codespec>,
}

impl CodespecHistory {
    fn latest(&self) -> Option<&Codespec> {
        self.versions.last()
    }
}

impl Versioned for CodespecHistory {
    /// Not used for optimistic concurrency (no caller ever supplies an
    /// `ifMatch` for a codespec); `RecordStore` still requires the
    /// trait, so this just reports the latest version number, which is
    /// enough to make two unrelated `put`s against different histories
    /// never collide on an eTag check neither of them performs.
    fn e_tag(&self) -> &str {
        self.versions.last().map(|c| c.image.as_str()).unwrap_or("")
    }
}

fn map_store_err(err: StoreError, name: &str) -> TygerError {
    match err {
        StoreError::NotFound => TygerError::NotFound { kind: "Codespec", id: name.to_string() },
        StoreError::ETagMismatch { .. } => TygerError::Backend("unexpected eTag conflict on codespec history".to_string()),
        StoreError::Io(e) | StoreError::Serde(e) => TygerError::Backend(e),
    }
}

fn validate(spec: &Codespec) -> Result<(), TygerError> {
    validate_codespec_name(&spec.name)?;
    if spec.image.trim().is_empty() {
        return Err(TygerError::InvalidArgument("codespec image must not be empty".to_string()));
    }
    Ok(())
}

pub struct CodespecRegistry {
    store: RecordStore<CodespecHistory>,
}

/// Whether `put` created a new version or returned an existing one
/// unchanged, mirroring the 200-vs-201 distinction in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    ReturnedExisting,
    CreatedNew,
}

impl CodespecRegistry {
    pub fn new(durable: Option<Arc<dyn Durable<CodespecHistory>>>) -> Self {
        Self { store: RecordStore::new(durable) }
    }

    pub async fn load(durable: Arc<dyn Durable<CodespecHistory>>) -> Result<Self, TygerError> {
        Ok(Self { store: RecordStore::load(durable).await.map_err(|e| map_store_err(e, ""))? })
    }

    /// Insert `spec` under `name`, deduping by content hash against the
    /// latest version: a matching hash returns that version unchanged
    /// (200), otherwise a new `version = latest + 1` is appended (201).
    pub async fn put(&self, mut spec: Codespec) -> Result<(Codespec, PutOutcome), TygerError> {
        validate(&spec)?;
        let name = spec.name.clone();
        let current = self.store.get(&name).await;

        if let Some(history) = &current {
            if let Some(latest) = history.latest() {
                if latest.content_hash() == spec.content_hash() {
                    return Ok((latest.clone(), PutOutcome::ReturnedExisting));
                }
            }
        }

        let next_version = current.as_ref().and_then(|h| h.latest()).map(|c| c.version + 1).unwrap_or(1);
        spec.version = next_version;

        let mut history = current.as_deref().cloned().unwrap_or_default();
        history.versions.push(spec.clone());
        self.store.put(&name, history, None).await.map_err(|e| map_store_err(e, &name))?;
        Ok((spec, PutOutcome::CreatedNew))
    }

    pub async fn get_latest(&self, name: &str) -> Result<Codespec, TygerError> {
        let history = self
            .store
            .get(name)
            .await
            .ok_or_else(|| TygerError::NotFound { kind: "Codespec", id: name.to_string() })?;
        history
            .latest()
            .cloned()
            .ok_or_else(|| TygerError::NotFound { kind: "Codespec", id: name.to_string() })
    }

    pub async fn get_version(&self, name: &str, version: u64) -> Result<Codespec, TygerError> {
        let history = self
            .store
            .get(name)
            .await
            .ok_or_else(|| TygerError::NotFound { kind: "Codespec", id: name.to_string() })?;
        history
            .versions
            .iter()
            .find(|c| c.version == version)
            .cloned()
            .ok_or_else(|| TygerError::NotFound { kind: "Codespec", id: format!("{name}/{version}") })
    }

    /// Newest-version-per-name, lexicographically by name, filtered by
    /// an optional prefix. Snapshot-consistent per page: the cursor
    /// encodes the last name returned, and only names that sort after
    /// it are considered on the next page, so a concurrent new version
    /// of an already-paged name never reappears (it would only change
    /// that name's *latest*, not its position in the ordering).
    pub async fn list(&self, prefix: Option<&str>, limit: usize, cursor: Option<&str>) -> Result<Page<Codespec>, TygerError> {
        let after = cursor.map(tyger_core::decode_cursor).transpose()?;
        let mut names = self.store.keys().await;
        names.sort();

        let mut items = Vec::with_capacity(limit);
        let mut last_name = None;
        for name in names {
            if let Some(prefix) = prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(after) = &after {
                if name.as_str() <= after.as_str() {
                    continue;
                }
            }
            let Some(history) = self.store.get(&name).await else { continue };
            let Some(latest) = history.latest() else { continue };
            if items.len() == limit {
                break;
            }
            last_name = Some(name.clone());
            items.push(latest.clone());
        }

        let next_link = match (&last_name, items.len() == limit) {
            (Some(name), true) => Some(tyger_core::encode_cursor(name)),
            _ => None,
        };
        Ok(Page { items, next_link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyger_core::{CodespecBuffers, CodespecVariant, Resources};

    fn spec(name: &str, image: &str) -> Codespec {
        Codespec {
            name: name.to_string(),
            version: 0,
            image: image.to_string(),
            command: vec![],
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            identity: None,
            resources: Resources::default(),
            max_replicas: None,
            variant: CodespecVariant::Job { buffers: CodespecBuffers::default(), sockets: vec![] },
        }
    }

    #[tokio::test]
    async fn first_put_creates_version_one() {
        let reg = CodespecRegistry::new(None);
        let (stored, outcome) = reg.put(spec("echo", "busybox")).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(outcome, PutOutcome::CreatedNew);
    }

    #[tokio::test]
    async fn identical_put_returns_existing_version() {
        let reg = CodespecRegistry::new(None);
        reg.put(spec("echo", "busybox")).await.unwrap();
        let (stored, outcome) = reg.put(spec("echo", "busybox")).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(outcome, PutOutcome::ReturnedExisting);
    }

    #[tokio::test]
    async fn changed_image_creates_new_version() {
        let reg = CodespecRegistry::new(None);
        reg.put(spec("echo", "busybox")).await.unwrap();
        let (stored, outcome) = reg.put(spec("echo", "alpine")).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(outcome, PutOutcome::CreatedNew);
    }

    #[tokio::test]
    async fn env_ordering_does_not_affect_identity() {
        let reg = CodespecRegistry::new(None);
        let mut a = spec("echo", "busybox");
        a.env.insert("A".to_string(), "1".to_string());
        a.env.insert("B".to_string(), "2".to_string());
        reg.put(a).await.unwrap();

        let mut b = spec("echo", "busybox");
        b.env.insert("B".to_string(), "2".to_string());
        b.env.insert("A".to_string(), "1".to_string());
        let (_, outcome) = reg.put(b).await.unwrap();
        assert_eq!(outcome, PutOutcome::ReturnedExisting);
    }

    #[tokio::test]
    async fn get_version_after_several_puts() {
        let reg = CodespecRegistry::new(None);
        reg.put(spec("echo", "busybox")).await.unwrap();
        reg.put(spec("echo", "alpine")).await.unwrap();
        let v1 = reg.get_version("echo", 1).await.unwrap();
        assert_eq!(v1.image, "busybox");
        let latest = reg.get_latest("echo").await.unwrap();
        assert_eq!(latest.image, "alpine");
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_paginates() {
        let reg = CodespecRegistry::new(None);
        reg.put(spec("alpha", "busybox")).await.unwrap();
        reg.put(spec("alpha-two", "busybox")).await.unwrap();
        reg.put(spec("beta", "busybox")).await.unwrap();

        let page = reg.list(Some("alpha"), 10, None).await.unwrap();
        let names: Vec<&str> = page.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "alpha-two"]);
    }

    #[tokio::test]
    async fn invalid_name_is_rejected() {
        let reg = CodespecRegistry::new(None);
        let err = reg.put(spec("Bad Name", "busybox")).await.unwrap_err();
        assert!(matches!(err, TygerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_image_is_rejected() {
        let reg = CodespecRegistry::new(None);
        let err = reg.put(spec("ok", "")).await.unwrap_err();
        assert!(matches!(err, TygerError::InvalidArgument(_)));
    }
}
