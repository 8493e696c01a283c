//! One sweep over a directory tree: load the cache, traverse, drain, persist.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{ChangeCache, SnapshotError};
use crate::compressor::Compressor;
use crate::engine::FileDecisionEngine;
use crate::filter::ExtensionFilter;
use crate::scheduler::BoundedScheduler;
use crate::stats::{RunStatistics, SessionSummary};
use crate::volume::Volume;

pub struct SessionController {
    cache: Arc<ChangeCache>,
    compressor: Arc<dyn Compressor>,
    volume: Arc<dyn Volume>,
    skip: ExtensionFilter,
    ceiling: usize,
    token: CancellationToken,
}

impl SessionController {
    pub fn new(
        cache: ChangeCache,
        compressor: Arc<dyn Compressor>,
        volume: Arc<dyn Volume>,
        skip: ExtensionFilter,
        ceiling: usize,
    ) -> Self {
        Self {
            cache: Arc::new(cache),
            compressor,
            volume,
            skip,
            ceiling,
            token: CancellationToken::new(),
        }
    }

    /// Start from the snapshot at `cache_path`. A corrupt snapshot is fatal.
    pub fn open(
        cache_path: &Path,
        compressor: Arc<dyn Compressor>,
        volume: Arc<dyn Volume>,
        skip: ExtensionFilter,
        ceiling: usize,
    ) -> Result<Self, SnapshotError> {
        let cache = ChangeCache::open(cache_path)?;
        info!(
            path = %cache_path.display(),
            entries = cache.len(),
            "cache loaded"
        );
        Ok(Self::new(cache, compressor, volume, skip, ceiling))
    }

    /// Stop admitting new work. Idempotent; admitted work still completes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Sweep `root`. Always drains admitted work and attempts a save, even
    /// when cancelled or when the root cannot be read.
    pub async fn run(&self, root: &Path) -> SessionSummary {
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        let started_at = Local::now();
        let clock = Instant::now();
        let cache_entries_at_start = self.cache.len();

        info!(
            root = %root.display(),
            skip_extensions = self.skip.len(),
            "session started"
        );

        let stats = Arc::new(RunStatistics::new());
        let engine = Arc::new(FileDecisionEngine::new(
            Arc::clone(&self.cache),
            Arc::clone(&stats),
            Arc::clone(&self.compressor),
            Arc::clone(&self.volume),
            self.skip.clone(),
        ));
        let scheduler = BoundedScheduler::new(
            engine,
            Arc::clone(&self.compressor),
            Arc::clone(&self.volume),
            self.ceiling,
        );

        let report = scheduler.run(&root, &self.token).await;

        let cache_entries_persisted = match self.cache.persist() {
            Ok(count) => Some(count),
            Err(e) => {
                error!("Failed to save cache: {e:#}");
                None
            }
        };

        let summary = SessionSummary {
            root,
            started_at,
            elapsed: clock.elapsed(),
            stats: stats.snapshot(),
            cache_entries_at_start,
            cache_entries_at_end: self.cache.len(),
            cache_entries_persisted,
            cancelled: report.cancelled,
            root_error: report.root_error,
            directory_errors: report.directory_errors,
            directory_flags_cleared: report.directory_flags_cleared,
        };

        info!(
            submitted = report.submitted,
            directories = report.directories,
            ceiling = scheduler.ceiling(),
            peak_in_flight = scheduler.in_flight().peak(),
            processed = summary.stats.processed,
            skipped = summary.stats.skipped(),
            cancelled = summary.cancelled,
            "session finished"
        );

        summary
    }
}
