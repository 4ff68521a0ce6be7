//! K-way merge of timestamp-ordered log sources (§4.4). Matches the
//! "one task per source plus one merging consumer" scheduling model:
//! each source is driven by its own spawned task through the
//! reformatters into a small bounded channel, and a single consumer
//! task (or, for the fixed case, the caller itself) repeatedly picks
//! the lowest-timestamped pending line across all channels. Memory is
//! bounded at O(k * max_line_bytes): each channel holds at most one
//! in-flight line per source.

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::reformat::{single_line_reformat, MultiBlockReformatter};

/// A raw, per-replica log stream: yields one fragment at a time, in the
/// order the backend produced them. A fragment may or may not carry its
/// own timestamp prefix (§4.4's reformatters handle both cases).
#[async_trait]
pub trait LogSource: Send {
    async fn next_fragment(&mut self) -> io::Result<Option<String>>;
}

/// Channel capacity per source. One in-flight reformatted line is
/// enough to bound memory without stalling a fast source behind a slow
/// consumer for more than a single line.
const SOURCE_CHANNEL_CAPACITY: usize = 1;

/// Drive one [`LogSource`] through both reformatters, sending completed
/// `(timestamp, line)` pairs into `tx` until the source is exhausted.
async fn drive_source(
    mut source: Box<dyn LogSource>,
    tx: mpsc::Sender<(DateTime<Utc>, String)>,
) {
    let mut multi_block = MultiBlockReformatter::new();
    loop {
        match source.next_fragment().await {
            Ok(Some(fragment)) => {
                if let Some((ts, body)) = multi_block.push(&fragment) {
                    let (ts, body) = reformat_completed(ts, body);
                    if tx.send((ts, body)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some((ts, body)) = multi_block.flush() {
                    let (ts, body) = reformat_completed(ts, body);
                    let _ = tx.send((ts, body)).await;
                }
                return;
            }
            Err(_) => return,
        }
    }
}

/// The multi-block reformatter already resolved the timestamp for a
/// completed line from its first fragment; re-run the single-line
/// reformatter over the fully assembled body only to catch the case
/// where that first fragment itself lacked a recognizable prefix (the
/// zero-timestamp fallback), keeping one code path for "no timestamp"
/// handling rather than duplicating it.
fn reformat_completed(ts: DateTime<Utc>, body: String) -> (DateTime<Utc>, String) {
    if ts == tyger_core::zero_timestamp() {
        let (_, reparsed_body) = single_line_reformat(&body);
        (ts, reparsed_body)
    } else {
        (ts, body)
    }
}

/// One pending peek slot per source, plus the stream to refill it from.
struct SourceCursor {
    stream: ReceiverStream<(DateTime<Utc>, String)>,
    peeked: Option<(DateTime<Utc>, String)>,
}

/// Merges a finite, known-up-front set of sources (§4.4 "Fixed").
/// Sources are each assumed to already yield lines in non-decreasing
/// timestamp order; the merger interleaves them into one non-decreasing
/// stream, stable with respect to source index on ties.
pub struct FixedLogMerger {
    cursors: Vec<SourceCursor>,
}

impl FixedLogMerger {
    /// Spawn one driver task per source and start merging.
    pub fn new(sources: Vec<Box<dyn LogSource>>) -> Self {
        let cursors = sources
            .into_iter()
            .map(|source| {
                let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
                tokio::spawn(drive_source(source, tx));
                SourceCursor { stream: ReceiverStream::new(rx), peeked: None }
            })
            .collect();
        Self { cursors }
    }

    /// Fill every cursor's peek slot that's currently empty, concurrently
    /// — each source can make progress while the others are still
    /// producing their next line, rather than priming round-robin.
    async fn fill_peeks(&mut self) {
        let refills = self.cursors.iter_mut().map(|cursor| async move {
            if cursor.peeked.is_none() {
                cursor.peeked = cursor.stream.next().await;
            }
        });
        join_all(refills).await;
    }

    /// Pull the next merged `(timestamp, line)` pair, or `None` once
    /// every source is exhausted.
    pub async fn next(&mut self) -> Option<(DateTime<Utc>, String)> {
        self.fill_peeks().await;

        let winner = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.peeked.as_ref().map(|(ts, _)| (i, *ts)))
            .min_by_key(|(i, ts)| (*ts, *i))
            .map(|(i, _)| i)?;

        self.cursors[winner].peeked.take()
    }

    /// Drain every remaining merged line.
    pub async fn collect_all(&mut self) -> Vec<(DateTime<Utc>, String)> {
        let mut out = Vec::new();
        while let Some(line) = self.next().await {
            out.push(line);
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LiveMergeError {
    #[error("the live merger was already activated")]
    AlreadyActivated,
}

enum LiveState {
    Pending(Vec<Box<dyn LogSource>>),
    Activated,
}

/// Accepts sources that may arrive over time; the merged output stays
/// blocked until [`activate`](Self::activate) freezes the set and
/// starts the fixed merge behind it (§4.4 "Live").
pub struct LiveLogMerger {
    state: Mutex<LiveState>,
    output: mpsc::Sender<(DateTime<Utc>, String)>,
}

impl LiveLogMerger {
    /// Create a live merger and its output channel. `capacity` bounds
    /// how far the consumer can lag the merge before it applies
    /// backpressure to every source.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(DateTime<Utc>, String)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { state: Mutex::new(LiveState::Pending(Vec::new())), output: tx }, rx)
    }

    /// Register a source before activation. Fails once
    /// [`activate`](Self::activate) has run: the set is frozen at that
    /// point, matching "merged output is blocked until activate() is
    /// called" — there is no well-defined point to splice a late source
    /// into an already-merging stream.
    pub async fn add_source(&self, source: Box<dyn LogSource>) -> Result<(), LiveMergeError> {
        match &mut *self.state.lock().await {
            LiveState::Pending(sources) => {
                sources.push(source);
                Ok(())
            }
            LiveState::Activated => Err(LiveMergeError::AlreadyActivated),
        }
    }

    /// Freeze the current set of sources and start merging them into
    /// the output channel. Idempotent calls after the first return
    /// `AlreadyActivated`.
    pub async fn activate(&self) -> Result<(), LiveMergeError> {
        let sources = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, LiveState::Activated) {
                LiveState::Pending(sources) => sources,
                LiveState::Activated => return Err(LiveMergeError::AlreadyActivated),
            }
        };

        let output = self.output.clone();
        tokio::spawn(async move {
            let mut merger = FixedLogMerger::new(sources);
            while let Some(line) = merger.next().await {
                if output.send(line).await.is_err() {
                    return;
                }
            }
        });
        Ok(())
    }
}

/// An in-memory [`LogSource`] over a pre-built list of raw fragments,
/// used by tests and by the fixed archival replay path that reads a
/// finished [`tyger_logstore`](../tyger_logstore) archive back in.
pub struct VecLogSource {
    fragments: VecDeque<String>,
}

impl VecLogSource {
    pub fn new(fragments: Vec<String>) -> Self {
        Self { fragments: fragments.into() }
    }
}

#[async_trait]
impl LogSource for VecLogSource {
    async fn next_fragment(&mut self) -> io::Result<Option<String>> {
        Ok(self.fragments.pop_front())
    }
}
