//! Bounded work scheduler.
//!
//! A blocking enumerator thread streams filesystem entries over a channel:
//! first every file directly inside the root, then, for each subdirectory in
//! depth-first order, that directory's files followed by a marker saying the
//! directory is finished. The async side turns each file into a unit of work
//! on tokio's blocking pool, admitting a unit only once a slot is free.
//!
//! ```text
//! enumerator ──Entry──▶ scheduler ──permit──▶ spawn_blocking(engine.visit)
//!                           │                        │
//!                    token checkpoint        slot + gauge released on drop
//! ```
//!
//! Cancellation checkpoints: before each file is admitted and before each
//! directory flag is cleared. Once the token fires nothing new is admitted,
//! but every unit already admitted runs to completion before `run` returns.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::compressor::Compressor;
use crate::engine::FileDecisionEngine;
use crate::volume::Volume;

/// Entries buffered between the enumerator and the scheduler.
const ENUMERATION_BUFFER: usize = 1024;

/// Default ceiling multiplier over available parallelism.
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 16;

/// Admission ceiling for a given multiplier, between 1 and the semaphore limit.
pub fn ceiling_for(multiplier: usize) -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(8);
    clamp_ceiling(parallelism.saturating_mul(multiplier))
}

fn clamp_ceiling(ceiling: usize) -> usize {
    ceiling.clamp(1, Semaphore::MAX_PERMITS)
}

#[derive(Debug)]
enum Entry {
    File(PathBuf),
    DirectoryDone(PathBuf),
}

/// Units admitted but not yet completed.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn admit(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            gauge: Arc::clone(self),
            _permit: permit,
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest value ever observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the gauge exactly once, even if the unit panics. The slot is
/// released only after the decrement, so the gauge never exceeds the ceiling.
struct InFlightGuard {
    gauge: Arc<InFlight>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a traversal did, independent of per-file outcomes.
#[derive(Debug, Default, Clone)]
pub struct ScheduleReport {
    pub submitted: u64,
    pub cancelled: bool,
    pub root_error: Option<String>,
    pub directories: u64,
    pub directory_errors: u64,
    pub directory_flags_cleared: u64,
}

#[derive(Debug, Default)]
struct Enumeration {
    directories: u64,
    directory_errors: u64,
}

pub struct BoundedScheduler {
    engine: Arc<FileDecisionEngine>,
    compressor: Arc<dyn Compressor>,
    volume: Arc<dyn Volume>,
    slots: Arc<Semaphore>,
    ceiling: usize,
    in_flight: Arc<InFlight>,
}

impl BoundedScheduler {
    pub fn new(
        engine: Arc<FileDecisionEngine>,
        compressor: Arc<dyn Compressor>,
        volume: Arc<dyn Volume>,
        ceiling: usize,
    ) -> Self {
        let ceiling = clamp_ceiling(ceiling);
        Self {
            engine,
            compressor,
            volume,
            slots: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Traverse `root`, returning only after every admitted unit has finished.
    pub async fn run(&self, root: &Path, token: &CancellationToken) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let (tx, mut rx) = mpsc::channel(ENUMERATION_BUFFER);
        let walk_root = root.to_path_buf();
        let walker = tokio::task::spawn_blocking(move || enumerate(&walk_root, &tx));
        let mut units = JoinSet::new();

        loop {
            let entry = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                entry = rx.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            match entry {
                Entry::File(path) => {
                    let permit = tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            report.cancelled = true;
                            break;
                        }
                        permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    let guard = self.in_flight.admit(permit);
                    let engine = Arc::clone(&self.engine);
                    units.spawn_blocking(move || {
                        let _guard = guard;
                        engine.visit(&path);
                    });
                    report.submitted += 1;
                }
                Entry::DirectoryDone(dir) => {
                    if token.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    if self.clear_directory_flag(dir).await {
                        report.directory_flags_cleared += 1;
                    }
                }
            }

            while let Some(result) = units.try_join_next() {
                self.reap(result);
            }
        }

        // Closing the channel stops the enumerator at its next send.
        drop(rx);

        if report.cancelled {
            info!(
                in_flight = self.in_flight.current(),
                "Cancellation requested, draining in-flight work"
            );
        }
        while let Some(result) = units.join_next().await {
            self.reap(result);
        }
        debug_assert_eq!(self.in_flight.current(), 0);

        match walker.await {
            Ok(Ok(enumeration)) => {
                report.directories = enumeration.directories;
                report.directory_errors = enumeration.directory_errors;
            }
            Ok(Err(e)) => {
                error!(root = %root.display(), "Cannot traverse root directory: {e}");
                report.root_error = Some(e.to_string());
            }
            Err(e) => {
                error!(root = %root.display(), "Directory enumeration aborted: {e}");
                report.root_error = Some(e.to_string());
            }
        }

        report
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            self.engine.stats().record_failure();
            error!("Worker task failed: {e}");
        }
    }

    /// Returns whether a flag was found and a removal attempted. Holds a
    /// worker slot so the subprocess counts against the ceiling.
    async fn clear_directory_flag(&self, dir: PathBuf) -> bool {
        let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
            return false;
        };
        let volume = Arc::clone(&self.volume);
        let compressor = Arc::clone(&self.compressor);
        let shown = dir.display().to_string();

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if !volume.is_directory_compressed(&dir)? {
                return Ok(None);
            }
            compressor.remove_directory_flag(&dir).map(Some)
        })
        .await;

        match result {
            Ok(Ok(None)) => false,
            Ok(Ok(Some(invocation))) => {
                if invocation.success {
                    debug!(dir = %shown, output = %invocation.output, "directory flag cleared");
                } else {
                    warn!(dir = %shown, output = %invocation.output, "Failed to clear directory flag");
                }
                true
            }
            Ok(Err(e)) => {
                warn!(dir = %shown, "Failed to clear directory flag: {e}");
                false
            }
            Err(e) => {
                error!(dir = %shown, "Directory flag task failed: {e}");
                false
            }
        }
    }
}

/// Stream the tree into `tx`. Errors returned here concern the root itself.
fn enumerate(root: &Path, tx: &mpsc::Sender<Entry>) -> io::Result<Enumeration> {
    let mut enumeration = Enumeration::default();

    // Root files first; failing to list the root is fatal for the traversal.
    for path in list_files(root)? {
        if tx.blocking_send(Entry::File(path)).is_err() {
            return Ok(enumeration);
        }
    }

    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                enumeration.directory_errors += 1;
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!(dir = %path, "Skipping directory: {e}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.into_path();
        enumeration.directories += 1;

        let files = match list_files(&dir) {
            Ok(files) => files,
            Err(e) => {
                enumeration.directory_errors += 1;
                warn!(dir = %dir.display(), "Skipping directory: {e}");
                walker.skip_current_dir();
                continue;
            }
        };
        for path in files {
            if tx.blocking_send(Entry::File(path)).is_err() {
                return Ok(enumeration);
            }
        }
        if tx.blocking_send(Entry::DirectoryDone(dir)).is_err() {
            return Ok(enumeration);
        }
    }

    Ok(enumeration)
}

/// Regular files directly inside `dir`; symlinks are not followed.
fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), "Failed to read directory entry: {e}");
                continue;
            }
        };
        match entry.file_type() {
            Ok(file_type) if file_type.is_file() => files.push(entry.path()),
            Ok(_) => {}
            Err(e) => warn!(path = %entry.path().display(), "Failed to read file type: {e}"),
        }
    }
    debug!(dir = %dir.display(), files = files.len(), "listed directory");
    Ok(files)
}
