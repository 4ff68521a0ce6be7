//! The two pre-processors that run before any merging happens (§4.4):
//! stamping a zero timestamp onto lines a backend forgot to prefix, and
//! coalescing a logical line a backend split into several timestamped
//! fragments back into one.

use chrono::{DateTime, Utc};

use tyger_core::zero_timestamp;

/// An RFC 3339 nanosecond timestamp is exactly this many bytes followed
/// by a single space: `2024-01-02T03:04:05.123456789Z` (30 chars) + `' '`.
const TIMESTAMP_PREFIX_LEN: usize = 30;

/// Split a raw line into its timestamp prefix (if present) and the rest.
/// A prefix is recognized only if the first 30 bytes parse as RFC 3339
/// and are followed by a space; anything else means the whole line is
/// body text with no timestamp.
fn split_prefix(raw: &str) -> Option<(DateTime<Utc>, &str)> {
    if raw.len() < TIMESTAMP_PREFIX_LEN + 1 {
        return None;
    }
    let (prefix, rest) = raw.split_at(TIMESTAMP_PREFIX_LEN);
    if !rest.starts_with(' ') {
        return None;
    }
    let ts = DateTime::parse_from_rfc3339(prefix).ok()?.with_timezone(&Utc);
    Some((ts, &rest[1..]))
}

/// Reformat one raw line into `(timestamp, body)`, assigning the zero
/// timestamp to lines that arrived without a recognizable prefix.
/// Output is conceptually re-emitted with a fresh 30-character prefix;
/// callers that need the literal formatted line use
/// [`format_prefixed`].
pub fn single_line_reformat(raw: &str) -> (DateTime<Utc>, String) {
    match split_prefix(raw) {
        Some((ts, body)) => (ts, body.to_string()),
        None => (zero_timestamp(), raw.to_string()),
    }
}

/// Render `(timestamp, body)` back into a line carrying the canonical
/// 30-character RFC 3339 nanosecond prefix.
pub fn format_prefixed(timestamp: DateTime<Utc>, body: &str) -> String {
    format!("{} {}", timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true), body)
}

/// Coalesces consecutive raw fragments that share the first fragment's
/// timestamp prefix into a single logical line, because some backends
/// split one log line into several timestamp-prefixed writes when their
/// internal buffer flushes mid-line.
///
/// Feed fragments one at a time via [`push`](Self::push); a `Some`
/// return is a completed logical line ready to hand to the single-line
/// reformatter. Call [`flush`](Self::flush) once the source is
/// exhausted to emit whatever fragment is still pending.
#[derive(Default)]
pub struct MultiBlockReformatter {
    pending: Option<PendingLine>,
}

struct PendingLine {
    prefix_ts: Option<DateTime<Utc>>,
    body: String,
}

impl MultiBlockReformatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw fragment. Returns a completed `(timestamp,
    /// body)` pair when `fragment` starts a new timestamp prefix and
    /// something was already pending; the new fragment becomes the
    /// pending line. The returned timestamp is the *first* fragment's,
    /// per §4.4.
    pub fn push(&mut self, fragment: &str) -> Option<(DateTime<Utc>, String)> {
        let (ts, body) = split_prefix(fragment)
            .map(|(ts, body)| (Some(ts), body.to_string()))
            .unwrap_or((None, fragment.to_string()));

        match (&mut self.pending, ts) {
            // A fragment with no timestamp of its own continues whatever
            // line is already pending (it's a continuation fragment).
            (Some(pending), None) => {
                pending.body.push_str(&body);
                None
            }
            // A fragment with a fresh timestamp starts a new line,
            // flushing whatever was pending before it.
            (pending_slot, Some(new_ts)) => {
                let completed = pending_slot
                    .take()
                    .map(|p| (p.prefix_ts.unwrap_or_else(zero_timestamp), p.body));
                *pending_slot = Some(PendingLine { prefix_ts: Some(new_ts), body });
                completed
            }
            // Nothing pending and this fragment has no timestamp either:
            // start a pending line with the zero timestamp.
            (pending_slot @ None, None) => {
                *pending_slot = Some(PendingLine { prefix_ts: None, body });
                None
            }
        }
    }

    /// Emit whatever fragment is still pending once the source has no
    /// more data. Idempotent: returns `None` on a second call.
    pub fn flush(&mut self) -> Option<(DateTime<Utc>, String)> {
        self.pending
            .take()
            .map(|p| (p.prefix_ts.unwrap_or_else(zero_timestamp), p.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn reformats_well_formed_line() {
        let (t, body) = single_line_reformat("2024-01-02T03:04:05.123456789Z hello world");
        assert_eq!(t, ts("2024-01-02T03:04:05.123456789Z"));
        assert_eq!(body, "hello world");
    }

    #[test]
    fn unprefixed_line_gets_zero_timestamp() {
        let (t, body) = single_line_reformat("no timestamp here");
        assert_eq!(t, zero_timestamp());
        assert_eq!(body, "no timestamp here");
    }

    #[test]
    fn formatted_prefix_is_thirty_chars() {
        let line = format_prefixed(ts("2024-01-02T03:04:05.123456789Z"), "x");
        let prefix_end = line.find(' ').unwrap();
        assert_eq!(prefix_end, TIMESTAMP_PREFIX_LEN);
    }

    #[test]
    fn multi_block_coalesces_continuation_fragments() {
        let mut r = MultiBlockReformatter::new();
        assert!(r.push("2024-01-02T03:04:05.123456789Z partial ").is_none());
        assert!(r.push("rest of the line").is_none());
        let (t, body) = r.flush().unwrap();
        assert_eq!(t, ts("2024-01-02T03:04:05.123456789Z"));
        assert_eq!(body, "partial rest of the line");
    }

    #[test]
    fn multi_block_flushes_on_next_timestamped_fragment() {
        let mut r = MultiBlockReformatter::new();
        assert!(r.push("2024-01-02T03:04:05.123456789Z first").is_none());
        let (t1, body1) = r.push("2024-01-02T03:04:06.000000000Z second").unwrap();
        assert_eq!(t1, ts("2024-01-02T03:04:05.123456789Z"));
        assert_eq!(body1, "first");
        let (t2, body2) = r.flush().unwrap();
        assert_eq!(t2, ts("2024-01-02T03:04:06.000000000Z"));
        assert_eq!(body2, "second");
    }

    #[test]
    fn flush_is_idempotent() {
        let mut r = MultiBlockReformatter::new();
        r.push("2024-01-02T03:04:05.123456789Z only");
        assert!(r.flush().is_some());
        assert!(r.flush().is_none());
    }
}
