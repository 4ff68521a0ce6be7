//! Archive storage for finished runs' logs (part of C7/C8's sweep): once a
//! run reaches a terminal status, its merged log stream is written once to
//! this append-only JSONL store for retention, then read back to serve
//! `GET /runs/{id}/logs` without needing the backend's live log API.
//!
//! Built on an append-only `EventLog` (`write_to_file`
//! opens in append mode, one JSON object per line); here each run gets its
//! own file instead of one shared log, since retention and `tailLines`
//! truncation are per run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tyger_core::LogRecord;

/// One archived log line: a timestamp, the source label it came from, and
/// the raw payload bytes (stored as a lossy UTF-8 string, matching how
/// logs are ultimately rendered to a client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedLine {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub line: String,
}

impl From<&LogRecord> for ArchivedLine {
    fn from(record: &LogRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            source: record.source.clone(),
            line: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

fn run_log_path(archive_dir: &Path, run_id: u64) -> PathBuf {
    archive_dir.join(format!("{run_id}.jsonl"))
}

/// Append-only per-run log archive on the local filesystem. A future SQL-
/// or blob-backed store can implement the same shape without touching
/// call sites (the same swappable-backend discipline `tyger-store`
/// applies to registry persistence).
#[derive(Debug, Clone)]
pub struct LogArchive {
    dir: PathBuf,
}

impl LogArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append `lines` to `run_id`'s archive file, creating it (and the
    /// archive directory) if necessary. Called once per run by the sweep's
    /// log archiver (§4.7 "Sweep"); idempotent re-runs append nothing new
    /// because the sweep only archives logs once per run (tracked by the
    /// run coordinator, not by this store).
    pub fn append(&self, run_id: u64, lines: &[ArchivedLine]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create log archive dir {}", self.dir.display()))?;
        let path = run_log_path(&self.dir, run_id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log archive {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for line in lines {
            let json = serde_json::to_string(line).context("failed to serialize archived line")?;
            writeln!(writer, "{json}").context("failed to write archived line")?;
        }
        writer.flush().context("failed to flush log archive")?;
        Ok(())
    }

    /// Whether `run_id` has an archive yet (used by the sweep to decide if
    /// a terminal run still needs archiving).
    pub fn exists(&self, run_id: u64) -> bool {
        run_log_path(&self.dir, run_id).exists()
    }

    /// Read back a run's archived lines, honoring the same `since` /
    /// `tail_lines` filters the live `/runs/{id}/logs` endpoint supports
    /// (§6.1).
    pub fn read(
        &self,
        run_id: u64,
        since: Option<DateTime<Utc>>,
        tail_lines: Option<usize>,
    ) -> Result<Vec<ArchivedLine>> {
        let path = run_log_path(&self.dir, run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)
            .with_context(|| format!("failed to open log archive {}", path.display()))?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("failed to read archived line")?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: ArchivedLine =
                serde_json::from_str(&line).context("failed to parse archived line")?;
            if since.is_none_or(|s| parsed.timestamp >= s) {
                lines.push(parsed);
            }
        }
        if let Some(n) = tail_lines {
            let skip = lines.len().saturating_sub(n);
            lines.drain(0..skip);
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line(ts: i64, text: &str) -> ArchivedLine {
        ArchivedLine {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            source: "stdout".to_string(),
            line: text.to_string(),
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::new(dir.path());
        assert!(!archive.exists(7));
        archive.append(7, &[line(1, "one"), line(2, "two")]).unwrap();
        archive.append(7, &[line(3, "three")]).unwrap();
        assert!(archive.exists(7));

        let all = archive.read(7, None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].line, "three");
    }

    #[test]
    fn read_honors_since_and_tail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::new(dir.path());
        archive
            .append(1, &[line(1, "a"), line(2, "b"), line(3, "c")])
            .unwrap();

        let since = archive.read(1, Some(Utc.timestamp_opt(2, 0).unwrap()), None).unwrap();
        assert_eq!(since.len(), 2);

        let tail = archive.read(1, None, Some(1)).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].line, "c");
    }

    #[test]
    fn read_of_unarchived_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::new(dir.path());
        assert_eq!(archive.read(999, None, None).unwrap().len(), 0);
    }
}
