//! In-memory stand-ins for the compressor and the attribute layer.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::compressor::{Compressor, Invocation};
use crate::types::FileProbe;
use crate::volume::{LocalVolume, Volume};

type Hook = Box<dyn Fn(&Path) + Send + Sync>;

/// Records every call instead of spawning anything.
#[derive(Default)]
pub struct FakeCompressor {
    calls: Mutex<Vec<(PathBuf, bool)>>,
    dir_calls: Mutex<Vec<PathBuf>>,
    delay: Duration,
    exit_failure: bool,
    spawn_error: bool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    after_compress: Option<Hook>,
}

impl FakeCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each invocation for `delay`, like a slow subprocess.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_exit(mut self) -> Self {
        self.exit_failure = true;
        self
    }

    pub fn failing_spawn(mut self) -> Self {
        self.spawn_error = true;
        self
    }

    /// Run after each compression call completes.
    pub fn on_compress(mut self, hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.after_compress = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<(PathBuf, bool)> {
        self.calls.lock().clone()
    }

    pub fn compressed_paths(&self) -> HashSet<PathBuf> {
        self.calls.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn dir_calls(&self) -> Vec<PathBuf> {
        self.dir_calls.lock().clone()
    }

    /// Most subprocesses of either kind running at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Compressor for FakeCompressor {
    fn compress(&self, path: &Path, force: bool) -> io::Result<Invocation> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.lock().push((path.to_path_buf(), force));
        if let Some(hook) = &self.after_compress {
            hook(path);
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.spawn_error {
            return Err(io::Error::new(io::ErrorKind::NotFound, "compact not found"));
        }
        Ok(Invocation {
            success: !self.exit_failure,
            output: format!("compressed {}", path.display()),
        })
    }

    fn remove_directory_flag(&self, path: &Path) -> io::Result<Invocation> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.dir_calls.lock().push(path.to_path_buf());

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Invocation {
            success: true,
            output: String::new(),
        })
    }
}

/// Real filesystem probing with injectable attributes and sizes.
#[derive(Default)]
pub struct FakeVolume {
    probes: Mutex<HashMap<PathBuf, FileProbe>>,
    system: Mutex<HashSet<PathBuf>>,
    compressed: Mutex<HashSet<PathBuf>>,
    compressed_dirs: Mutex<HashSet<PathBuf>>,
    cleared: Mutex<Vec<PathBuf>>,
}

impl FakeVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `path` from memory instead of the real filesystem.
    pub fn set_file(&self, path: impl Into<PathBuf>, logical: u64, physical: u64) {
        self.probes.lock().insert(
            path.into(),
            FileProbe {
                logical,
                physical,
                ..Default::default()
            },
        );
    }

    /// Stop serving `path` from memory; later probes hit the real filesystem.
    pub fn forget(&self, path: &Path) {
        self.probes.lock().remove(path);
    }

    pub fn mark_system(&self, path: impl Into<PathBuf>) {
        self.system.lock().insert(path.into());
    }

    pub fn mark_compressed(&self, path: impl Into<PathBuf>) {
        self.compressed.lock().insert(path.into());
    }

    pub fn mark_compressed_dir(&self, path: impl Into<PathBuf>) {
        self.compressed_dirs.lock().insert(path.into());
    }

    pub fn cleared(&self) -> Vec<PathBuf> {
        self.cleared.lock().clone()
    }
}

impl Volume for FakeVolume {
    fn probe(&self, path: &Path) -> io::Result<FileProbe> {
        let mut probe = match self.probes.lock().get(path) {
            Some(probe) => *probe,
            None => LocalVolume.probe(path)?,
        };
        probe.system |= self.system.lock().contains(path);
        probe.compressed |= self.compressed.lock().contains(path);
        Ok(probe)
    }

    fn is_directory_compressed(&self, path: &Path) -> io::Result<bool> {
        Ok(self.compressed_dirs.lock().contains(path))
    }

    fn clear_compressed(&self, path: &Path) -> io::Result<()> {
        self.compressed.lock().remove(path);
        self.cleared.lock().push(path.to_path_buf());
        Ok(())
    }
}
