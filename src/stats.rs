//! Run-wide counters and the end-of-session summary.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

use crate::types::Outcome;
use crate::utils::{
    NumberFormatOptions, format_bytes, format_duration, format_number, format_optional,
    per_minute,
};

/// Counters shared by every worker. Only ever incremented.
#[derive(Debug, Default)]
pub struct RunStatistics {
    skipped_extension: AtomicU64,
    skipped_attribute: AtomicU64,
    skipped_unchanged: AtomicU64,
    processed: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    inflated: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    logical_bytes: AtomicU64,
    physical_bytes: AtomicU64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::SkippedExtension => &self.skipped_extension,
            Outcome::SkippedAttribute => &self.skipped_attribute,
            Outcome::SkippedUnchanged => &self.skipped_unchanged,
            Outcome::Processed => &self.processed,
            Outcome::Empty => &self.empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inflation(&self) {
        self.inflated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_logical(&self, bytes: u64) {
        self.logical_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_physical(&self, bytes: u64) {
        self.physical_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Physical size before and after a compression pass.
    pub fn add_transfer(&self, read: u64, written: u64) {
        self.bytes_read.fetch_add(read, Ordering::Relaxed);
        self.bytes_written.fetch_add(written, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            skipped_extension: self.skipped_extension.load(Ordering::Relaxed),
            skipped_attribute: self.skipped_attribute.load(Ordering::Relaxed),
            skipped_unchanged: self.skipped_unchanged.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            inflated: self.inflated.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            logical_bytes: self.logical_bytes.load(Ordering::Relaxed),
            physical_bytes: self.physical_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RunStatistics`] taken after the drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub skipped_extension: u64,
    pub skipped_attribute: u64,
    pub skipped_unchanged: u64,
    pub processed: u64,
    pub empty: u64,
    pub failed: u64,
    pub inflated: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
}

impl StatsSnapshot {
    pub fn skipped(&self) -> u64 {
        self.skipped_extension + self.skipped_attribute + self.skipped_unchanged
    }

    pub fn files_visited(&self) -> u64 {
        self.skipped() + self.processed + self.empty + self.failed
    }

    /// Share of logical bytes not occupying disk space, in percent.
    pub fn space_savings_percent(&self) -> Option<f64> {
        if self.logical_bytes == 0 {
            return None;
        }
        let saved = self.logical_bytes as f64 - self.physical_bytes as f64;
        Some(saved / self.logical_bytes as f64 * 100.0)
    }

    /// Logical bytes divided by physical bytes.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.physical_bytes == 0 {
            return None;
        }
        Some(self.logical_bytes as f64 / self.physical_bytes as f64)
    }
}

/// Everything reported at the end of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub root: PathBuf,
    pub started_at: DateTime<Local>,
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
    pub cache_entries_at_start: usize,
    pub cache_entries_at_end: usize,
    /// Entries written to disk, or `None` when the save failed
    pub cache_entries_persisted: Option<usize>,
    pub cancelled: bool,
    pub root_error: Option<String>,
    pub directory_errors: u64,
    pub directory_flags_cleared: u64,
}

fn serialize_secs<S>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl SessionSummary {
    pub fn cache_delta(&self) -> i64 {
        self.cache_entries_at_end as i64 - self.cache_entries_at_start as i64
    }

    pub fn files_per_minute(&self) -> Option<f64> {
        per_minute(self.stats.files_visited(), self.elapsed)
    }

    pub fn processed_per_minute(&self) -> Option<f64> {
        per_minute(self.stats.processed, self.elapsed)
    }

    pub fn render(&self, options: &NumberFormatOptions) -> String {
        let stats = &self.stats;
        let n = |v: u64| format_number(v, options);
        let mut out = String::new();

        let status = if self.cancelled {
            "cancelled"
        } else if self.root_error.is_some() {
            "aborted"
        } else {
            "completed"
        };
        let _ = writeln!(out, "Session {status}: {}", self.root.display());
        let _ = writeln!(
            out,
            "  Started:              {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(err) = &self.root_error {
            let _ = writeln!(out, "  Root error:           {err}");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "  Files visited:        {}", n(stats.files_visited()));
        let _ = writeln!(out, "  Processed:            {}", n(stats.processed));
        let _ = writeln!(out, "  Skipped (extension):  {}", n(stats.skipped_extension));
        let _ = writeln!(out, "  Skipped (attribute):  {}", n(stats.skipped_attribute));
        let _ = writeln!(out, "  Skipped (unchanged):  {}", n(stats.skipped_unchanged));
        let _ = writeln!(out, "  Empty:                {}", n(stats.empty));
        if stats.failed > 0 {
            let _ = writeln!(out, "  Failed:               {}", n(stats.failed));
        }
        if stats.inflated > 0 {
            let _ = writeln!(out, "  Grew when compressed: {}", n(stats.inflated));
        }
        if self.directory_errors > 0 {
            let _ = writeln!(out, "  Unreadable dirs:      {}", n(self.directory_errors));
        }
        if self.directory_flags_cleared > 0 {
            let _ = writeln!(
                out,
                "  Dir flags cleared:    {}",
                n(self.directory_flags_cleared)
            );
        }
        let _ = writeln!(out);

        let delta = self.cache_delta();
        let sign = if delta < 0 { "-" } else { "+" };
        let _ = writeln!(
            out,
            "  Cache entries:        {} ({sign}{})",
            n(self.cache_entries_at_end as u64),
            n(delta.unsigned_abs())
        );
        if self.cache_entries_persisted.is_none() {
            let _ = writeln!(out, "  Cache save:           FAILED (see log)");
        }
        let _ = writeln!(out, "  Bytes read:           {}", format_bytes(stats.bytes_read));
        let _ = writeln!(
            out,
            "  Bytes written:        {}",
            format_bytes(stats.bytes_written)
        );
        let _ = writeln!(
            out,
            "  Logical size:         {}",
            format_bytes(stats.logical_bytes)
        );
        let _ = writeln!(
            out,
            "  Size on disk:         {}",
            format_bytes(stats.physical_bytes)
        );
        let _ = writeln!(
            out,
            "  Space savings:        {}",
            format_optional(stats.space_savings_percent(), 2, "%")
        );
        let _ = writeln!(
            out,
            "  Compression ratio:    {}",
            format_optional(stats.compression_ratio(), 2, "x")
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "  Elapsed:              {}", format_duration(self.elapsed));
        let _ = writeln!(
            out,
            "  Files/minute:         {}",
            format_optional(self.files_per_minute(), 1, "")
        );
        let _ = write!(
            out,
            "  Processed/minute:     {}",
            format_optional(self.processed_per_minute(), 1, "")
        );

        out
    }
}
