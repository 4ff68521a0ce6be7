//! The log merger (C4): reassembles, timestamp-tags, and merges
//! multiple timestamp-prefixed log sources in real time with bounded
//! memory (§4.4).
//!
//! Built on a bounded-channel-per-worker idiom: one task per source plus
//! one merging consumer. `futures::future::join_all` primes every
//! source's peek concurrently rather than round-robin;
//! `tokio_stream::wrappers::ReceiverStream` gives each source's channel a
//! uniform `Stream` front end.

mod merge;
mod reformat;

pub use merge::{FixedLogMerger, LiveLogMerger, LiveMergeError, LogSource, VecLogSource};
pub use reformat::{format_prefixed, single_line_reformat, MultiBlockReformatter};

use chrono::{DateTime, Utc};

use tyger_core::LogRecord;

/// Render a merged `(timestamp, body)` pair as the final line the
/// `/runs/{id}/logs` endpoint writes to its response body: a canonical
/// 30-character timestamp prefix followed by the body and a trailing
/// newline.
pub fn render_line(timestamp: DateTime<Utc>, body: &str) -> String {
    format!("{}\n", format_prefixed(timestamp, body))
}

/// Adapt a merged `(timestamp, body)` pair from a named source into the
/// archive's [`LogRecord`] shape, for handing off to
/// [`tyger_logstore`](../tyger_logstore) once a run finishes.
pub fn to_log_record(source: impl Into<String>, timestamp: DateTime<Utc>, body: &str) -> LogRecord {
    LogRecord { timestamp, source: source.into(), payload: body.as_bytes().to_vec() }
}
