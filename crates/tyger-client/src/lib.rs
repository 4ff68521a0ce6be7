//! Async HTTP client for the tyger control plane: buffers, codespecs,
//! runs, and access-URL issuance over the `tyger-server` REST surface.
//!
//! A thin `reqwest`-backed wrapper translating HTTP status/body into
//! typed errors, async throughout so it can implement
//! [`tyger_dataplane::access_url::ControlPlaneSession`] directly.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use tyger_core::{AccessUrl, Buffer, Codespec, Page, Run, TygerError};
use tyger_dataplane::access_url::{AccessMode, ControlPlaneSession};
use tyger_runs::RunCreateSpec;

/// Default timeout for a single control-plane request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const USER_AGENT: &str = concat!("tyger-client/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(rename = "apiVersions", default)]
    api_versions: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Reconstruct a [`TygerError`] from the `{error:{code,message}}` envelope
/// `tyger-server`'s `ApiError` emits. Structured fields the wire format
/// doesn't carry (e.g. `NotFound`'s `kind`) collapse to a fixed
/// placeholder; callers needing the status code should match on
/// `TygerError::code()`/`http_status()` rather than the original variant.
fn error_from_body(body: &str) -> TygerError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return TygerError::Backend(body.to_string());
    };
    match envelope.error.code.as_str() {
        "NotFound" => TygerError::NotFound { kind: "resource", id: envelope.error.message },
        "ETagMismatch" => TygerError::ETagMismatch { expected: String::new(), found: envelope.error.message },
        "InvalidState" => TygerError::InvalidState(envelope.error.message),
        "InvalidArgument" => TygerError::InvalidArgument(envelope.error.message),
        "UnsupportedApiVersion" => {
            TygerError::UnsupportedApiVersion { supported: envelope.error.api_versions.unwrap_or_default() }
        }
        "Unauthenticated" => TygerError::Unauthenticated,
        "Unauthorized" => TygerError::Unauthorized,
        "BufferFailed" => TygerError::BufferFailed,
        "AccessExpired" => TygerError::AccessExpired,
        "IntegrityError" => TygerError::IntegrityError(envelope.error.message),
        "Timeout" => TygerError::Timeout,
        _ => TygerError::Backend(envelope.error.message),
    }
}

fn io_err(e: reqwest::Error) -> TygerError {
    TygerError::Backend(e.to_string())
}

/// A configured connection to one `tyger-server` instance, pinned to a
/// single `api-version`.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    api_version: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl AsRef<str>, api_version: impl Into<String>) -> Result<Self, TygerError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| TygerError::InvalidArgument(format!("invalid server URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(io_err)?;
        Ok(Self { base_url, api_version: api_version.into(), http })
    }

    fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("path is a valid relative URL")
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, TygerError> {
        let resp = req
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .await
            .map_err(io_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(io_err)?;
        if !status.is_success() {
            return Err(error_from_body(&body));
        }
        serde_json::from_str(&body).map_err(|e| TygerError::Backend(format!("malformed response: {e}")))
    }

    async fn send_no_body(&self, req: reqwest::RequestBuilder) -> Result<(), TygerError> {
        let resp = req
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .await
            .map_err(io_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(io_err)?;
            return Err(error_from_body(&body));
        }
        Ok(())
    }

    // -- Buffers ---------------------------------------------------------

    pub async fn create_buffer(
        &self,
        tags: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<Buffer, TygerError> {
        #[derive(Serialize)]
        struct Req {
            tags: BTreeMap<String, String>,
            #[serde(default, with = "tyger_duration::millis::option")]
            ttl: Option<Duration>,
        }
        self.send(self.http.post(self.url("buffers")).json(&Req { tags, ttl })).await
    }

    pub async fn get_buffer(&self, id: &str, include_soft_deleted: bool) -> Result<Buffer, TygerError> {
        let mut url = self.url(&format!("buffers/{id}"));
        if include_soft_deleted {
            url.query_pairs_mut().append_pair("soft-deleted", "true");
        }
        self.send(self.http.get(url)).await
    }

    pub async fn list_buffers(
        &self,
        tag: Option<&str>,
        exclude_tag: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Buffer>, TygerError> {
        let mut req = self.http.get(self.url("buffers")).query(&[("limit", limit.to_string())]);
        if let Some(t) = tag {
            req = req.query(&[("tag", t)]);
        }
        if let Some(t) = exclude_tag {
            req = req.query(&[("exclude-tag", t)]);
        }
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }
        self.send(req).await
    }

    pub async fn delete_buffer(&self, id: &str) -> Result<Buffer, TygerError> {
        self.send(self.http.delete(self.url(&format!("buffers/{id}")))).await
    }

    pub async fn restore_buffer(&self, id: &str) -> Result<Buffer, TygerError> {
        self.send(self.http.post(self.url(&format!("buffers/{id}/restore")))).await
    }

    pub async fn purge_buffer(&self, id: &str) -> Result<(), TygerError> {
        self.send_no_body(self.http.post(self.url(&format!("buffers/{id}/purge")))).await
    }

    pub async fn get_buffer_access_url_raw(&self, id: &str, writeable: bool) -> Result<AccessUrl, TygerError> {
        let mut req = self.http.post(self.url(&format!("buffers/{id}/access")));
        if writeable {
            req = req.query(&[("writeable", "true")]);
        }
        self.send(req).await
    }

    // -- Codespecs ---------------------------------------------------------

    pub async fn put_codespec(&self, name: &str, spec: &Codespec) -> Result<Codespec, TygerError> {
        self.send(self.http.put(self.url(&format!("codespecs/{name}"))).json(spec)).await
    }

    pub async fn get_latest_codespec(&self, name: &str) -> Result<Codespec, TygerError> {
        self.send(self.http.get(self.url(&format!("codespecs/{name}")))).await
    }

    pub async fn get_codespec_version(&self, name: &str, version: u64) -> Result<Codespec, TygerError> {
        self.send(self.http.get(self.url(&format!("codespecs/{name}/versions/{version}")))).await
    }

    pub async fn list_codespecs(
        &self,
        prefix: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Codespec>, TygerError> {
        let mut req = self.http.get(self.url("codespecs")).query(&[("limit", limit.to_string())]);
        if let Some(p) = prefix {
            req = req.query(&[("prefix", p)]);
        }
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }
        self.send(req).await
    }

    // -- Runs ---------------------------------------------------------

    pub async fn create_run(&self, spec: RunCreateSpec) -> Result<Run, TygerError> {
        self.send(self.http.post(self.url("runs")).json(&spec)).await
    }

    pub async fn get_run(&self, id: u64, watch: bool) -> Result<Run, TygerError> {
        let mut url = self.url(&format!("runs/{id}"));
        if watch {
            url.query_pairs_mut().append_pair("watch", "true");
        }
        self.send(self.http.get(url)).await
    }

    pub async fn cancel_run(&self, id: u64) -> Result<Run, TygerError> {
        self.send(self.http.post(self.url(&format!("runs/{id}/cancel")))).await
    }

    pub async fn get_run_logs(&self, id: u64, tail_lines: Option<usize>, timestamps: bool) -> Result<String, TygerError> {
        let mut req = self.http.get(self.url(&format!("runs/{id}/logs")));
        if let Some(n) = tail_lines {
            req = req.query(&[("tailLines", n.to_string())]);
        }
        if timestamps {
            req = req.query(&[("timestamps", "true")]);
        }
        let resp = req
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .await
            .map_err(io_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(io_err)?;
        if !status.is_success() {
            return Err(error_from_body(&body));
        }
        Ok(body)
    }
}

/// Lets [`tyger_dataplane::access_url::AccessUrlContainer`] mint access
/// URLs through this client without the data plane ever depending on
/// `reqwest` directly.
#[async_trait]
impl ControlPlaneSession for Client {
    async fn get_buffer_access_url(
        &self,
        buffer_id: &str,
        mode: AccessMode,
    ) -> Result<tyger_dataplane::access_url::AccessUrl, TygerError> {
        let writeable = matches!(mode, AccessMode::Write);
        let issued = self.get_buffer_access_url_raw(buffer_id, writeable).await?;
        let url = Url::parse(&issued.url)
            .map_err(|e| TygerError::InvalidArgument(format!("server issued an invalid access URL: {e}")))?;
        Ok(tyger_dataplane::access_url::AccessUrl { url, expires_at: issued.expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_a_valid_base_url() {
        let client = Client::new("http://localhost:8080", "1.0").unwrap();
        assert_eq!(client.api_version, "1.0");
    }

    #[test]
    fn rejects_an_invalid_base_url() {
        assert!(Client::new("not a url", "1.0").is_err());
    }

    #[test]
    fn parses_a_not_found_error_body() {
        let body = r#"{"error":{"code":"NotFound","message":"buffer abc not found"}}"#;
        let err = error_from_body(body);
        assert!(matches!(err, TygerError::NotFound { .. }));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn parses_an_unsupported_api_version_error_with_list() {
        let body = r#"{"error":{"code":"UnsupportedApiVersion","message":"...","apiVersions":["1.0","1.1"]}}"#;
        let err = error_from_body(body);
        match err {
            TygerError::UnsupportedApiVersion { supported } => {
                assert_eq!(supported, vec!["1.0".to_string(), "1.1".to_string()]);
            }
            _ => panic!("expected UnsupportedApiVersion"),
        }
    }

    #[test]
    fn falls_back_to_backend_error_on_malformed_body() {
        let err = error_from_body("not json");
        assert!(matches!(err, TygerError::Backend(_)));
    }
}
