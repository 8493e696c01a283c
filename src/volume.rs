//! OS-level file attribute queries and mutations.

use std::fs;
use std::io;
use std::path::Path;

use crate::types::FileProbe;

/// Filesystem attributes the decision engine and scheduler depend on.
pub trait Volume: Send + Sync {
    /// Sizes and attributes of a regular file
    fn probe(&self, path: &Path) -> io::Result<FileProbe>;

    /// Whether a directory carries the native compression flag
    fn is_directory_compressed(&self, path: &Path) -> io::Result<bool>;

    /// Drop the native compression marking from a file
    fn clear_compressed(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalVolume;

#[cfg(windows)]
mod native {
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::fs::MetadataExt;
    use std::path::Path;

    use windows_sys::Win32::Storage::FileSystem::{
        FILE_ATTRIBUTE_COMPRESSED, FILE_ATTRIBUTE_SYSTEM, GetCompressedFileSizeW,
        INVALID_FILE_SIZE, SetFileAttributesW,
    };

    fn wide(path: &Path) -> Vec<u16> {
        path.as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    pub fn attributes(meta: &std::fs::Metadata) -> (bool, bool) {
        let attrs = meta.file_attributes();
        (
            attrs & FILE_ATTRIBUTE_SYSTEM != 0,
            attrs & FILE_ATTRIBUTE_COMPRESSED != 0,
        )
    }

    pub fn physical_size(path: &Path, _meta: &std::fs::Metadata) -> io::Result<u64> {
        let wide_path = wide(path);
        let mut high: u32 = 0;
        // SAFETY: `wide_path` is NUL-terminated and outlives the call.
        let low = unsafe { GetCompressedFileSizeW(wide_path.as_ptr(), &mut high) };
        if low == INVALID_FILE_SIZE {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(0) {
                return Err(err);
            }
        }
        Ok(((high as u64) << 32) | low as u64)
    }

    pub fn clear_compressed(path: &Path, meta: &std::fs::Metadata) -> io::Result<()> {
        let wide_path = wide(path);
        let attrs = meta.file_attributes() & !FILE_ATTRIBUTE_COMPRESSED;
        // SAFETY: `wide_path` is NUL-terminated and outlives the call.
        if unsafe { SetFileAttributesW(wide_path.as_ptr(), attrs) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(windows))]
mod native {
    use std::io;
    use std::path::Path;

    pub fn attributes(_meta: &std::fs::Metadata) -> (bool, bool) {
        (false, false)
    }

    #[cfg(unix)]
    pub fn physical_size(_path: &Path, meta: &std::fs::Metadata) -> io::Result<u64> {
        use std::os::unix::fs::MetadataExt;
        // st_blocks is always in 512-byte units
        Ok(meta.blocks() * 512)
    }

    #[cfg(not(unix))]
    pub fn physical_size(_path: &Path, meta: &std::fs::Metadata) -> io::Result<u64> {
        Ok(meta.len())
    }

    pub fn clear_compressed(_path: &Path, _meta: &std::fs::Metadata) -> io::Result<()> {
        Ok(())
    }
}

impl Volume for LocalVolume {
    fn probe(&self, path: &Path) -> io::Result<FileProbe> {
        let meta = fs::metadata(path)?;
        let (system, compressed) = native::attributes(&meta);
        Ok(FileProbe {
            logical: meta.len(),
            physical: native::physical_size(path, &meta)?,
            system,
            compressed,
        })
    }

    fn is_directory_compressed(&self, path: &Path) -> io::Result<bool> {
        let meta = fs::metadata(path)?;
        Ok(native::attributes(&meta).1)
    }

    fn clear_compressed(&self, path: &Path) -> io::Result<()> {
        let meta = fs::metadata(path)?;
        native::clear_compressed(path, &meta)
    }
}
