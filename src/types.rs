use serde::{Deserialize, Serialize};

/// What happened to a single file during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Extension is in the exclusion set
    SkippedExtension,
    /// Carries the OS "system" attribute
    SkippedAttribute,
    /// Size matches the cached size from a previous run
    SkippedUnchanged,
    /// Handed to the external compressor
    Processed,
    /// Zero-length file; tallied but never compressed
    Empty,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::SkippedExtension => "skipped (extension)",
            Outcome::SkippedAttribute => "skipped (attribute)",
            Outcome::SkippedUnchanged => "skipped (unchanged)",
            Outcome::Processed => "processed",
            Outcome::Empty => "empty",
        }
    }
}

/// Point-in-time view of a file's sizes and OS attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileProbe {
    /// Declared (uncompressed) length in bytes
    pub logical: u64,
    /// Allocated size on disk after compression and cluster rounding
    pub physical: u64,
    /// Marked as reserved by the operating system
    pub system: bool,
    /// Carries the filesystem's native compression marking
    pub compressed: bool,
}
