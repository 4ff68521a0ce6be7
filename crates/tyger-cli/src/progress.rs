//! Progress reporting for buffer read/write streaming, with TTY detection
//! falling back to plain
//! text output when stdout isn't a terminal.

use std::io::IsTerminal;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

pub fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

/// Tracks bytes transferred through a buffer read/write, showing a
/// progress bar in TTY mode and periodic text updates otherwise.
pub struct ByteProgressReporter {
    is_tty: bool,
    bar: Option<ProgressBar>,
    label: String,
    start: Instant,
}

impl ByteProgressReporter {
    pub fn new(label: impl Into<String>) -> Self {
        let is_tty = is_tty();
        let label = label.into();
        let bar = if is_tty {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            Some(pb)
        } else {
            None
        };
        Self { is_tty, bar, label, start: Instant::now() }
    }

    pub fn silent(label: impl Into<String>) -> Self {
        Self { is_tty: false, bar: None, label: label.into(), start: Instant::now() }
    }

    pub fn update(&self, bytes: u64) {
        let elapsed = self.start.elapsed();
        let msg = format!("{}: {bytes} bytes ({elapsed:?})", self.label);
        if self.is_tty {
            if let Some(bar) = &self.bar {
                bar.set_message(msg);
                bar.tick();
            }
        }
    }

    pub fn finish(self, total_bytes: u64) {
        let elapsed = self.start.elapsed();
        let msg = format!("{}: {total_bytes} bytes in {elapsed:?}", self.label);
        if self.is_tty {
            if let Some(bar) = self.bar {
                bar.finish_with_message(msg);
            }
        } else {
            eprintln!("{msg}");
        }
    }
}
