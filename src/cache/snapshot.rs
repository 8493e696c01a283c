//! On-disk snapshot format for the change cache.
//!
//! A snapshot is the bincode encoding of [`Snapshot`] followed by an 8-byte
//! little-endian xxh3 checksum of that body. Anything that does not decode
//! cleanly, including trailing bytes or an unknown version, is reported as
//! corruption rather than silently discarded.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

const MAGIC: [u8; 4] = *b"LZXC";
pub const SNAPSHOT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 8;

#[derive(Encode, Decode, Debug)]
struct Snapshot {
    magic: [u8; 4],
    version: u32,
    entries: Vec<(i32, u32)>,
}

/// Failure to read or decode a persisted snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to read cache snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache snapshot is truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("cache snapshot checksum mismatch (stored {stored:016x}, computed {computed:016x})")]
    ChecksumMismatch { stored: u64, computed: u64 },

    #[error("cache snapshot could not be decoded: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("cache snapshot has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("file is not a cache snapshot (bad magic)")]
    BadMagic,

    #[error("unsupported cache snapshot version {0} (expected {expected})", expected = SNAPSHOT_VERSION)]
    UnsupportedVersion(u32),
}

pub fn encode(entries: Vec<(i32, u32)>) -> anyhow::Result<Vec<u8>> {
    let snapshot = Snapshot {
        magic: MAGIC,
        version: SNAPSHOT_VERSION,
        entries,
    };
    let mut bytes = bincode::encode_to_vec(&snapshot, bincode::config::standard())
        .map_err(|e| anyhow::anyhow!("Failed to serialize cache snapshot: {e}"))?;
    let checksum = xxh3_64(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<(i32, u32)>, SnapshotError> {
    if bytes.len() < CHECKSUM_LEN {
        return Err(SnapshotError::Truncated { len: bytes.len() });
    }
    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);

    let mut stored = [0u8; CHECKSUM_LEN];
    stored.copy_from_slice(trailer);
    let stored = u64::from_le_bytes(stored);
    let computed = xxh3_64(body);
    if stored != computed {
        return Err(SnapshotError::ChecksumMismatch { stored, computed });
    }

    let (snapshot, consumed): (Snapshot, usize) =
        bincode::decode_from_slice(body, bincode::config::standard())?;
    if consumed != body.len() {
        return Err(SnapshotError::TrailingBytes(body.len() - consumed));
    }
    if snapshot.magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }

    Ok(snapshot.entries)
}

/// Read a snapshot from disk. A missing file is not an error.
pub fn read(path: &Path) -> Result<Option<Vec<(i32, u32)>>, SnapshotError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    decode(&bytes).map(Some)
}

/// Atomic write via temp file + rename.
pub fn write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
}
