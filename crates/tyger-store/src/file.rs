//! A [`Durable`] implementation that keeps one JSON file per record in a
//! directory, written with an atomic-rename idiom: serialize to a `.tmp`
//! sibling, `sync_all`, `rename` over the real path, then best-effort
//! `fsync` the parent directory so the rename itself survives a crash.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Durable, StoreError};

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let data =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serde(e.to_string()))?;
    {
        let mut f = fs::File::create(&tmp).map_err(|e| StoreError::Io(e.to_string()))?;
        f.write_all(&data)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
    fsync_parent_dir(path);
    Ok(())
}

/// Keys are sanitized to filenames with a fixed `.json` suffix; callers
/// are expected to pass identifiers already restricted to the codespec
/// / buffer / run naming rules, so no further escaping is attempted here.
fn record_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

/// On-disk registry backend: one directory, one file per record.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    dir: PathBuf,
}

impl FileRegistryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl<T> Durable<T> for FileRegistryStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn persist(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = record_path(&self.dir, key);
        atomic_write_json(&path, value)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = record_path(&self.dir, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn load_all(&self) -> Result<Vec<(String, T)>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StoreError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let data = fs::read(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            let value: T =
                serde_json::from_slice(&data).map_err(|e| StoreError::Serde(e.to_string()))?;
            out.push((key, value));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
