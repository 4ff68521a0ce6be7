//! Core domain types shared by every Tyger crate: the buffer, codespec, and
//! run records, the access-URL and log-record value types, the error
//! taxonomy, and the content-hash/eTag helpers the registries build on.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub use tyger_duration::{format_duration, parse_duration, DurationParseError, TygerDuration};

/// `0001-01-01T00:00:00Z`, assigned to log lines that carry no timestamp.
pub fn zero_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("0001-01-01T00:00:00Z")
        .expect("constant is a valid RFC3339 timestamp")
        .with_timezone(&Utc)
}

// ---------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------

/// Every error kind a Tyger operation can surface to a caller, one variant
/// per row of the error table. `tyger-server` maps each variant to an HTTP
/// status and `{error:{code,message}}` body exactly once, at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum TygerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("eTag mismatch: expected {expected}, found {found}")]
    ETagMismatch { expected: String, found: String },

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported api-version; supported versions: {}", supported.join(", "))]
    UnsupportedApiVersion { supported: Vec<String> },

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unauthorized")]
    Unauthorized,

    #[error("buffer is in a failed state")]
    BufferFailed,

    #[error("access URL expired and cannot be renewed")]
    AccessExpired,

    #[error("integrity error: {0}")]
    IntegrityError(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("run exceeded its timeout")]
    Timeout,
}

impl TygerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        TygerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// HTTP status code `tyger-server` should map this variant to.
    pub fn http_status(&self) -> u16 {
        match self {
            TygerError::NotFound { .. } => 404,
            TygerError::ETagMismatch { .. } => 412,
            TygerError::InvalidState(_) => 412,
            TygerError::InvalidArgument(_) => 400,
            TygerError::UnsupportedApiVersion { .. } => 400,
            TygerError::Unauthenticated => 401,
            TygerError::Unauthorized => 403,
            TygerError::BufferFailed => 409,
            TygerError::AccessExpired => 409,
            TygerError::IntegrityError(_) => 409,
            TygerError::Backend(_) => 502,
            TygerError::Timeout => 504,
        }
    }

    /// Stable machine-readable error code, used as `error.code` in the
    /// response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TygerError::NotFound { .. } => "NotFound",
            TygerError::ETagMismatch { .. } => "ETagMismatch",
            TygerError::InvalidState(_) => "InvalidState",
            TygerError::InvalidArgument(_) => "InvalidArgument",
            TygerError::UnsupportedApiVersion { .. } => "UnsupportedApiVersion",
            TygerError::Unauthenticated => "Unauthenticated",
            TygerError::Unauthorized => "Unauthorized",
            TygerError::BufferFailed => "BufferFailed",
            TygerError::AccessExpired => "AccessExpired",
            TygerError::IntegrityError(_) => "IntegrityError",
            TygerError::Backend(_) => "Backend",
            TygerError::Timeout => "Timeout",
        }
    }

    /// Retry classification, reused by `tyger-retry` to pick a policy for
    /// data-plane and backend errors.
    pub fn class(&self) -> ErrorClass {
        match self {
            TygerError::IntegrityError(msg) if msg.contains("md5") => ErrorClass::Retryable,
            TygerError::IntegrityError(_) => ErrorClass::Permanent,
            TygerError::Backend(_) => ErrorClass::Ambiguous,
            TygerError::Timeout => ErrorClass::Permanent,
            TygerError::AccessExpired => ErrorClass::Permanent,
            TygerError::BufferFailed => ErrorClass::Permanent,
            TygerError::NotFound { .. }
            | TygerError::ETagMismatch { .. }
            | TygerError::InvalidState(_)
            | TygerError::InvalidArgument(_)
            | TygerError::UnsupportedApiVersion { .. }
            | TygerError::Unauthenticated
            | TygerError::Unauthorized => ErrorClass::Permanent,
        }
    }
}

/// Three-way retry classification, fed into `tyger-retry`'s policy
/// selection via `config_for_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Safe to retry automatically (e.g. a transient MD5 mismatch).
    Retryable,
    /// Retrying cannot help (validation failures, hash-chain corruption).
    Permanent,
    /// Outcome of the prior attempt is unknown; retry only with an
    /// idempotency check.
    Ambiguous,
}

// ---------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BufferState {
    Active,
    SoftDeleted,
    Purged,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferState::Active => write!(f, "Active"),
            BufferState::SoftDeleted => write!(f, "SoftDeleted"),
            BufferState::Purged => write!(f, "Purged"),
        }
    }
}

impl BufferState {
    /// Whether `next` is a one-way-valid transition from `self`.
    /// `SoftDeleted -> Active` (restore) is the sole reversal.
    pub fn can_transition_to(self, next: BufferState) -> bool {
        matches!(
            (self, next),
            (BufferState::Active, BufferState::SoftDeleted)
                | (BufferState::SoftDeleted, BufferState::Active)
                | (BufferState::SoftDeleted, BufferState::Purged)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buffer {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub e_tag: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: BufferState,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub purged_at: Option<DateTime<Utc>>,
}

impl Buffer {
    pub fn is_visible(&self, include_soft_deleted: bool) -> bool {
        match self.state {
            BufferState::Active => true,
            BufferState::SoftDeleted => include_soft_deleted,
            BufferState::Purged => false,
        }
    }

    /// A buffer's tag map is a superset of `filters` and shares no entry
    /// with `exclude_filters` (§8 "Tag filter correctness").
    pub fn matches_tag_filters(
        &self,
        filters: &BTreeMap<String, String>,
        exclude_filters: &BTreeMap<String, String>,
    ) -> bool {
        let superset = filters
            .iter()
            .all(|(k, v)| self.tags.get(k) == Some(v));
        let excluded = exclude_filters.iter().any(|(k, v)| self.tags.get(k) == Some(v));
        superset && !excluded
    }
}

// ---------------------------------------------------------------------
// Codespec
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodespecKind {
    Job,
    Worker,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodespecBuffers {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Socket {
    pub port: u16,
    pub input_buffer: Option<String>,
    pub output_buffer: Option<String>,
}

/// The per-kind extension fields. `job` and `worker` codespecs share every
/// other field; only this part varies by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CodespecVariant {
    Job {
        #[serde(default)]
        buffers: CodespecBuffers,
        #[serde(default)]
        sockets: Vec<Socket>,
    },
    Worker {
        #[serde(default)]
        endpoints: BTreeMap<String, u16>,
    },
}

impl CodespecVariant {
    pub fn kind(&self) -> CodespecKind {
        match self {
            CodespecVariant::Job { .. } => CodespecKind::Job,
            CodespecVariant::Worker { .. } => CodespecKind::Worker,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Codespec {
    pub name: String,
    pub version: u64,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub identity: Option<String>,
    #[serde(default)]
    pub resources: Resources,
    pub max_replicas: Option<u32>,
    #[serde(flatten)]
    pub variant: CodespecVariant,
}

static CODESPEC_NAME_RE_MSG: &str = "name must match [a-z][a-z0-9._-]*";
static BUFFER_NAME_RE_MSG: &str = "buffer name must match [a-z0-9][a-z0-9-]*[a-z0-9]";

/// Validate a codespec's `name` field against `[a-z][a-z0-9._-]*`.
pub fn validate_codespec_name(name: &str) -> Result<(), TygerError> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_lowercase() => chars
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(TygerError::InvalidArgument(CODESPEC_NAME_RE_MSG.to_string()))
    }
}

/// Validate a buffer parameter name against `[a-z0-9][a-z0-9-]*[a-z0-9]`.
pub fn validate_buffer_name(name: &str) -> Result<(), TygerError> {
    let bytes = name.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let ok = match bytes.len() {
        0 => false,
        1 => is_alnum(bytes[0]),
        _ => {
            is_alnum(bytes[0])
                && is_alnum(*bytes.last().unwrap())
                && bytes[1..bytes.len() - 1]
                    .iter()
                    .all(|&b| is_alnum(b) || b == b'-')
        }
    };
    if ok {
        Ok(())
    } else {
        Err(TygerError::InvalidArgument(BUFFER_NAME_RE_MSG.to_string()))
    }
}

impl Codespec {
    pub fn kind(&self) -> CodespecKind {
        self.variant.kind()
    }

    /// Canonical content hash over every field but `name`/`version`, used
    /// for the content-addressed dedup described in §4.6: two `put`s with
    /// differently ordered env maps hash identically because `env` (and
    /// every other map in this struct) is a `BTreeMap`, so `serde_json`
    /// already serializes it in sorted-key order.
    pub fn content_hash(&self) -> String {
        #[derive(Serialize)]
        struct Identity<'a> {
            image: &'a str,
            command: &'a [String],
            args: &'a [String],
            working_dir: &'a Option<String>,
            env: &'a BTreeMap<String, String>,
            identity: &'a Option<String>,
            resources: &'a Resources,
            max_replicas: &'a Option<u32>,
            variant: &'a CodespecVariant,
        }
        let identity = Identity {
            image: &self.image,
            command: &self.command,
            args: &self.args,
            working_dir: &self.working_dir,
            env: &self.env,
            identity: &self.identity,
            resources: &self.resources,
            max_replicas: &self.max_replicas,
            variant: &self.variant,
        };
        sha256_hex_json(&identity).expect("Codespec fields are always JSON-serializable")
    }
}

// ---------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceling,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled
        )
    }

    /// Whether `cancel()` may be called while the run is in this state.
    /// Calling cancel while already `Canceling` is accepted idempotently
    /// (an Open Question in the source material, resolved here).
    pub fn cancelable(self) -> bool {
        matches!(
            self,
            RunStatus::Pending | RunStatus::Running | RunStatus::Canceling
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Canceling => "Canceling",
            RunStatus::Canceled => "Canceled",
        };
        write!(f, "{s}")
    }
}

/// A codespec reference: either a registered `(name, version)` pair or an
/// inline spec that is normalized but never persisted to the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CodespecRef {
    Named { name: String, version: Option<u64> },
    Inline(Box<Codespec>),
}

/// A buffer parameter binding. `_` means "create a fresh auto-buffer";
/// the empty string means "stream directly between client and pod with no
/// stored buffer" (the ephemeral form); anything else must name an
/// existing `Active` buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferParameter {
    Existing(String),
    Auto,
    Ephemeral,
}

impl Serialize for BufferParameter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BufferParameter::Existing(id) => serializer.serialize_str(id),
            BufferParameter::Auto => serializer.serialize_str("_"),
            BufferParameter::Ephemeral => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for BufferParameter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "_" => BufferParameter::Auto,
            "" => BufferParameter::Ephemeral,
            _ => BufferParameter::Existing(s),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCodeTarget {
    pub codespec: CodespecRef,
    #[serde(default)]
    pub buffers: BTreeMap<String, BufferParameter>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, with = "tyger_duration::millis")]
    pub buffer_ttl: std::time::Duration,
    pub node_pool: Option<String>,
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: u64,
    pub kind: RunKind,
    pub job: RunCodeTarget,
    pub worker: Option<RunCodeTarget>,
    pub cluster: Option<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(with = "tyger_duration::millis")]
    pub buffer_access_ttl: std::time::Duration,
    pub e_tag: String,
    pub status: RunStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------
// AccessURL / LogRecord
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessUrl {
    /// Whether this URL's `expires_at` is at least `safety_margin` in the
    /// future of `now` (§4.1's `getValidAccessURL` contract).
    pub fn valid_for(&self, now: DateTime<Utc>, safety_margin: std::time::Duration) -> bool {
        match chrono::Duration::from_std(safety_margin) {
            Ok(margin) => self.expires_at > now + margin,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_link: Option<String>,
}

/// Opaque continuation cursor encoding the last row's sort key. Decoded
/// only by the server, per §9 "Pagination cursor".
pub fn encode_cursor(last_key: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(last_key.as_bytes())
}

pub fn decode_cursor(cursor: &str) -> Result<String, TygerError> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| TygerError::InvalidArgument("malformed pagination cursor".to_string()))
}

// ---------------------------------------------------------------------
// Content hashing / eTags
// ---------------------------------------------------------------------

/// SHA-256 of `value`'s canonical JSON form, hex-encoded. Because every map
/// in this crate's types is a `BTreeMap` and `serde_json` is built without
/// the `preserve_order` feature, the JSON produced here already has
/// sorted object keys at every nesting level, so this is insertion-order
/// independent by construction.
pub fn sha256_hex_json<T: Serialize>(value: &T) -> Result<String, TygerError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| TygerError::InvalidArgument(format!("not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// A fresh eTag for a record whose canonical content is `value`, combined
/// with a monotonic counter so that two mutations producing the same
/// canonical content still receive distinct eTags: a mutable record's
/// version token must change on every write even when content is
/// momentarily repeated.
pub fn fresh_etag<T: Serialize>(value: &T, revision: u64) -> Result<String, TygerError> {
    #[derive(Serialize)]
    struct Versioned<'a, T> {
        content: &'a T,
        revision: u64,
    }
    sha256_hex_json(&Versioned {
        content: value,
        revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_state_transitions() {
        assert!(BufferState::Active.can_transition_to(BufferState::SoftDeleted));
        assert!(BufferState::SoftDeleted.can_transition_to(BufferState::Active));
        assert!(BufferState::SoftDeleted.can_transition_to(BufferState::Purged));
        assert!(!BufferState::Active.can_transition_to(BufferState::Purged));
        assert!(!BufferState::Purged.can_transition_to(BufferState::Active));
    }

    #[test]
    fn codespec_dedup_ignores_env_order() {
        let base = Codespec {
            name: "echo".to_string(),
            version: 1,
            image: "busybox".to_string(),
            command: vec![],
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            identity: None,
            resources: Resources::default(),
            max_replicas: None,
            variant: CodespecVariant::Job {
                buffers: CodespecBuffers::default(),
                sockets: vec![],
            },
        };
        let mut a = base.clone();
        a.env.insert("A".to_string(), "1".to_string());
        a.env.insert("B".to_string(), "2".to_string());

        let mut b = base.clone();
        b.env.insert("B".to_string(), "2".to_string());
        b.env.insert("A".to_string(), "1".to_string());

        assert_eq!(a.content_hash(), b.content_hash());

        let mut c = base;
        c.env.insert("A".to_string(), "different".to_string());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn codespec_name_validation() {
        assert!(validate_codespec_name("echo").is_ok());
        assert!(validate_codespec_name("echo-v2.1_beta").is_ok());
        assert!(validate_codespec_name("Echo").is_err());
        assert!(validate_codespec_name("").is_err());
        assert!(validate_codespec_name("1echo").is_err());
    }

    #[test]
    fn buffer_name_validation() {
        assert!(validate_buffer_name("input").is_ok());
        assert!(validate_buffer_name("a").is_ok());
        assert!(validate_buffer_name("in-0").is_ok());
        assert!(validate_buffer_name("-input").is_err());
        assert!(validate_buffer_name("input-").is_err());
        assert!(validate_buffer_name("").is_err());
    }

    #[test]
    fn buffer_parameter_roundtrip() {
        let auto: BufferParameter = serde_json::from_str("\"_\"").unwrap();
        assert_eq!(auto, BufferParameter::Auto);
        let ephemeral: BufferParameter = serde_json::from_str("\"\"").unwrap();
        assert_eq!(ephemeral, BufferParameter::Ephemeral);
        let existing: BufferParameter = serde_json::from_str("\"buf-1\"").unwrap();
        assert_eq!(existing, BufferParameter::Existing("buf-1".to_string()));
    }

    #[test]
    fn tag_filter_matching() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        tags.insert("team".to_string(), "core".to_string());
        let buffer = Buffer {
            id: "b1".to_string(),
            created_at: Utc::now(),
            location: None,
            tags,
            e_tag: "x".to_string(),
            expires_at: None,
            state: BufferState::Active,
            soft_deleted_at: None,
            purged_at: None,
        };

        let mut filters = BTreeMap::new();
        filters.insert("env".to_string(), "prod".to_string());
        assert!(buffer.matches_tag_filters(&filters, &BTreeMap::new()));

        let mut excludes = BTreeMap::new();
        excludes.insert("team".to_string(), "core".to_string());
        assert!(!buffer.matches_tag_filters(&filters, &excludes));
    }

    #[test]
    fn access_url_safety_margin() {
        let now = Utc::now();
        let url = AccessUrl {
            url: "https://example/container".to_string(),
            expires_at: now + chrono::Duration::seconds(20),
        };
        assert!(!url.valid_for(now, std::time::Duration::from_secs(30)));
        let url2 = AccessUrl {
            url: url.url.clone(),
            expires_at: now + chrono::Duration::seconds(60),
        };
        assert!(url2.valid_for(now, std::time::Duration::from_secs(30)));
    }

    #[test]
    fn cursor_roundtrip() {
        let encoded = encode_cursor("codespec-name-0042");
        let decoded = decode_cursor(&encoded).unwrap();
        assert_eq!(decoded, "codespec-name-0042");
    }

    proptest::proptest! {
        #[test]
        fn proptest_cursor_roundtrip(key in "[a-zA-Z0-9_/-]{0,64}") {
            let encoded = encode_cursor(&key);
            let decoded = decode_cursor(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, key);
        }
    }
}
