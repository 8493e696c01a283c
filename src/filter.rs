//! Extension-based exclusion of files that should never be compressed.

use std::collections::HashSet;
use std::path::Path;

/// Formats that are already compressed; recompressing them wastes I/O.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[
    "7z", "zip", "rar", "gz", "tgz", "bz2", "xz", "zst", "lz4", "cab", "msi", "jpg", "jpeg",
    "png", "gif", "webp", "heic", "avif", "mp3", "aac", "ogg", "opus", "flac", "m4a", "mp4",
    "m4v", "mkv", "webm", "avi", "mov", "wmv", "docx", "xlsx", "pptx", "jar", "apk", "iso",
];

/// Set of excluded extensions.
///
/// Matching follows the platform's filename convention: case-insensitive on
/// Windows, exact elsewhere.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for ext in extensions {
            filter.add(ext.as_ref());
        }
        filter
    }

    /// Accepts `tmp`, `.tmp` or ` .tmp `; blank entries are ignored.
    pub fn add(&mut self, ext: &str) {
        let normalized = normalize(ext.trim().trim_start_matches('.'));
        if !normalized.is_empty() {
            self.extensions.insert(normalized);
        }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&normalize(ext)))
    }
}

#[cfg(windows)]
fn normalize(ext: &str) -> String {
    ext.to_ascii_lowercase()
}

#[cfg(not(windows))]
fn normalize(ext: &str) -> String {
    ext.to_string()
}
