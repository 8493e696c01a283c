//! Persistent change-detection cache.
//!
//! Maps a [`PathIdentity`] to the file size observed right after the file was
//! last compressed. A file whose current size still matches its entry is
//! assumed to be in its compressed state already and is skipped.
//!
//! ## Identity collisions
//!
//! Identities are 32-bit hashes of the full path, so distinct paths can map to
//! the same key. A collision makes the cache misjudge one file (a false skip or
//! a redundant recompression); the later write replaces the earlier entry.
//! Nothing on disk is ever harmed by it.

mod snapshot;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

pub use snapshot::SnapshotError;

/// Cache key derived from a file's full path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathIdentity(i32);

impl PathIdentity {
    /// Hash a path using xxh3, truncated to the 32-bit key width.
    #[inline]
    pub fn new(path: &Path) -> Self {
        Self(xxh3_64(path.as_os_str().as_encoded_bytes()) as u32 as i32)
    }

    #[inline]
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }
}

/// Sizes are stored truncated to 32 bits.
#[inline]
pub fn truncate_size(len: u64) -> u32 {
    len as u32
}

/// Statistics about a persisted snapshot
#[derive(Debug)]
pub struct CacheInfo {
    pub total_entries: usize,
    pub db_size: u64,
}

/// Get the default location of the cache snapshot
pub fn cache_db_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.join(".lzx-sweep").join("cache.bin"))
}

/// Delete a persisted snapshot. Returns whether a file was removed.
pub fn reset_snapshot(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Describe a snapshot on disk without keeping it loaded.
pub fn inspect_snapshot(path: &Path) -> Result<Option<CacheInfo>, SnapshotError> {
    let Some(entries) = snapshot::read(path)? else {
        return Ok(None);
    };
    let db_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    Ok(Some(CacheInfo {
        total_entries: entries.len(),
        db_size,
    }))
}

/// Concurrent identity -> size map, shared by every worker of a session.
pub struct ChangeCache {
    entries: DashMap<PathIdentity, u32>,
    /// Snapshot location; `None` keeps the cache in memory only
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl ChangeCache {
    /// Create an empty in-memory cache (no persistence)
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Load the snapshot at `path`, or start empty if there is none.
    ///
    /// Any snapshot that exists but cannot be decoded is an error; callers
    /// must not continue with a partially trusted cache.
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        let entries = DashMap::new();
        if let Some(stored) = snapshot::read(path)? {
            for (key, size) in stored {
                entries.insert(PathIdentity::from_raw(key), size);
            }
        }

        Ok(Self {
            entries,
            path: Some(path.to_path_buf()),
            save_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn lookup(&self, identity: PathIdentity) -> Option<u32> {
        self.entries.get(&identity).map(|r| *r)
    }

    /// True when the cached size equals `len` exactly.
    #[inline]
    pub fn is_unchanged(&self, identity: PathIdentity, len: u64) -> bool {
        self.lookup(identity) == Some(truncate_size(len))
    }

    /// Insert or replace an entry, returning the previous size.
    #[inline]
    pub fn upsert(&self, identity: PathIdentity, len: u64) -> Option<u32> {
        self.entries.insert(identity, truncate_size(len))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by key so snapshots are reproducible.
    pub fn entries(&self) -> Vec<(i32, u32)> {
        let mut entries: Vec<(i32, u32)> = self
            .entries
            .iter()
            .map(|r| (r.key().raw(), *r.value()))
            .collect();
        entries.sort_unstable_by_key(|&(key, _)| key);
        entries
    }

    /// Write the full map to disk. Concurrent calls are serialized.
    ///
    /// Returns the number of entries written (0 for an in-memory cache).
    pub fn persist(&self) -> Result<usize> {
        let _guard = self.save_lock.lock();

        let Some(path) = self.path.as_deref() else {
            return Ok(0);
        };

        let entries = self.entries();
        let count = entries.len();
        let bytes = snapshot::encode(entries)?;
        snapshot::write(path, &bytes)
            .with_context(|| format!("Failed to write cache snapshot {}", path.display()))?;

        Ok(count)
    }
}

impl Default for ChangeCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ChangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCache")
            .field("entries", &self.entries.len())
            .field("path", &self.path)
            .finish()
    }
}
