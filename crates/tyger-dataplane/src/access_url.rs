//! The access-URL container (C1): a signed URL to a buffer's storage
//! container, refreshed before its TTL expires.
//!
//! Three construction shapes match §4.1: a buffer id backed by a live
//! control-plane session, a path to a file holding a signed URL (re-read on
//! expiry), and a raw signed URL string (never renewable). All three are
//! hidden behind [`AccessUrlSource`]; callers only ever see
//! [`AccessUrlContainer::get_valid_access_url`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use url::Url;

use tyger_core::TygerError;

/// The minimum time an access URL must remain valid for
/// [`AccessUrlContainer::get_valid_access_url`] to hand it out without
/// first attempting a refresh (§4.1, §5: "safety margin ≥ 30 s").
pub const SAFETY_MARGIN_SECONDS: i64 = 30;

/// A signed URL granting time-bounded access to a buffer's storage
/// container (§3 "AccessURL").
#[derive(Debug, Clone)]
pub struct AccessUrl {
    pub url: Url,
    pub expires_at: DateTime<Utc>,
}

impl AccessUrl {
    fn is_valid(&self, now: DateTime<Utc>, margin_seconds: i64) -> bool {
        self.expires_at - now > chrono::Duration::seconds(margin_seconds)
    }
}

/// Whether access is being requested to read an existing buffer or to
/// write a new one; some sources mint differently-scoped URLs for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A control-plane session capable of minting a fresh access URL for a
/// buffer id. Implemented by `tyger-client`; kept as a trait here so the
/// data plane never depends on the HTTP client crate.
#[async_trait]
pub trait ControlPlaneSession: Send + Sync {
    async fn get_buffer_access_url(
        &self,
        buffer_id: &str,
        mode: AccessMode,
    ) -> Result<AccessUrl, TygerError>;
}

/// Where an [`AccessUrlContainer`] goes to mint a fresh [`AccessUrl`] when
/// the cached one is no longer valid.
#[async_trait]
trait AccessUrlSource: Send + Sync {
    async fn refresh(&self) -> Result<AccessUrl, TygerError>;
}

struct BufferIdSource {
    buffer_id: String,
    mode: AccessMode,
    session: Arc<dyn ControlPlaneSession>,
}

#[async_trait]
impl AccessUrlSource for BufferIdSource {
    async fn refresh(&self) -> Result<AccessUrl, TygerError> {
        self.session
            .get_buffer_access_url(&self.buffer_id, self.mode)
            .await
    }
}

/// A signed URL is re-read from disk on every refresh; some callers rotate
/// the file out-of-band (e.g. a sidecar renewing a mounted secret).
struct UrlFileSource {
    path: PathBuf,
}

#[async_trait]
impl AccessUrlSource for UrlFileSource {
    async fn refresh(&self) -> Result<AccessUrl, TygerError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TygerError::InvalidArgument(format!(
                "failed to read access URL file {}: {e}",
                self.path.display()
            )))?;
        parse_signed_url(contents.trim())
    }
}

/// A raw signed URL has no refresh path: once it expires, every subsequent
/// request fails with [`TygerError::AccessExpired`].
struct RawUrlSource {
    parsed: Mutex<Option<Result<AccessUrl, ()>>>,
    raw: String,
}

#[async_trait]
impl AccessUrlSource for RawUrlSource {
    async fn refresh(&self) -> Result<AccessUrl, TygerError> {
        let mut cache = self.parsed.lock().await;
        if cache.is_none() {
            *cache = Some(parse_signed_url(&self.raw).map_err(|_| ()));
        }
        match cache.as_ref().unwrap() {
            Ok(url) if url.is_valid(Utc::now(), 0) => Ok(url.clone()),
            Ok(_) | Err(()) => Err(TygerError::AccessExpired),
        }
    }
}

/// Parse a signed URL string, extracting its SAS expiry (`se=` query
/// parameter) for the blob-storage signed-URL convention §6's block format
/// interoperates with. A URL without an `se` parameter is treated as
/// already expired: it can never be proven valid so it is never handed
/// out as a cached value.
fn parse_signed_url(s: &str) -> Result<AccessUrl, TygerError> {
    let url = Url::parse(s)
        .map_err(|e| TygerError::InvalidArgument(format!("invalid access URL: {e}")))?;
    let expires_at = url
        .query_pairs()
        .find(|(k, _)| k == "se")
        .and_then(|(_, v)| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() - chrono::Duration::seconds(1));
    Ok(AccessUrl { url, expires_at })
}

/// Thread-safe access-URL holder. Concurrent callers racing a refresh
/// observe a single refresh attempt: the cached value and the refresh
/// critical section share one `tokio::sync::Mutex`, so the second caller
/// to arrive simply re-checks validity once it acquires the lock (the
/// same double-checked-locking idiom a distributed lock would use
/// for its "is this still mine" recheck inside the critical section).
pub struct AccessUrlContainer {
    source: Arc<dyn AccessUrlSource>,
    cached: Mutex<Option<AccessUrl>>,
    margin_seconds: i64,
}

impl AccessUrlContainer {
    pub fn from_buffer_id(
        buffer_id: impl Into<String>,
        mode: AccessMode,
        session: Arc<dyn ControlPlaneSession>,
    ) -> Self {
        Self::new(Arc::new(BufferIdSource {
            buffer_id: buffer_id.into(),
            mode,
            session,
        }))
    }

    pub fn from_url_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(UrlFileSource { path: path.into() }))
    }

    pub fn from_raw_url(raw: impl Into<String>) -> Self {
        Self::new(Arc::new(RawUrlSource {
            raw: raw.into(),
            parsed: Mutex::new(None),
        }))
    }

    fn new(source: Arc<dyn AccessUrlSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
            margin_seconds: SAFETY_MARGIN_SECONDS,
        }
    }

    #[cfg(test)]
    fn with_margin(source: Arc<dyn AccessUrlSource>, margin_seconds: i64) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
            margin_seconds,
        }
    }

    /// Returns a URL valid for at least [`SAFETY_MARGIN_SECONDS`], refreshing
    /// from the source if the cached value is missing or too close to
    /// expiry. Fails with [`TygerError::AccessExpired`] if the source
    /// cannot produce a valid one (the raw-URL case).
    pub async fn get_valid_access_url(&self) -> Result<AccessUrl, TygerError> {
        let mut cached = self.cached.lock().await;
        if let Some(url) = cached.as_ref() {
            if url.is_valid(Utc::now(), self.margin_seconds) {
                return Ok(url.clone());
            }
        }
        let fresh = self.source.refresh().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        ttl_seconds: i64,
    }

    #[async_trait]
    impl AccessUrlSource for CountingSource {
        async fn refresh(&self) -> Result<AccessUrl, TygerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessUrl {
                url: Url::parse("https://example.blob.core.windows.net/c?sig=x").unwrap(),
                expires_at: Utc::now() + chrono::Duration::seconds(self.ttl_seconds),
            })
        }
    }

    #[tokio::test]
    async fn reuses_unexpired_url() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            ttl_seconds: 3600,
        });
        let container = AccessUrlContainer::new(source.clone());
        container.get_valid_access_url().await.unwrap();
        container.get_valid_access_url().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_when_within_safety_margin() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            ttl_seconds: 10,
        });
        let container = AccessUrlContainer::with_margin(source.clone(), 30);
        container.get_valid_access_url().await.unwrap();
        container.get_valid_access_url().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn raw_expired_url_never_validates() {
        let container = AccessUrlContainer::from_raw_url(
            "https://example.blob.core.windows.net/c?sig=x&se=2000-01-01T00:00:00Z",
        );
        let err = container.get_valid_access_url().await.unwrap_err();
        assert!(matches!(err, TygerError::AccessExpired));
    }
}
