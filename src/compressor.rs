//! Adapter around the external compression executable.
//!
//! Every call is a blocking subprocess run with captured output. The caller's
//! worker slot is held for the whole invocation, so the scheduler ceiling is
//! also the ceiling on concurrent subprocesses.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::CompressionConfig;

/// Result of one external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Exit status was zero
    pub success: bool,
    /// Captured stdout, followed by stderr when there was any
    pub output: String,
}

/// The external compression capability.
pub trait Compressor: Send + Sync {
    /// Compress one file. `force` overrides an existing, weaker compression.
    fn compress(&self, path: &Path, force: bool) -> io::Result<Invocation>;

    /// Clear the compression flag from a directory so new files are not
    /// implicitly compressed by the filesystem.
    fn remove_directory_flag(&self, path: &Path) -> io::Result<Invocation>;
}

/// `compact.exe`-style command line driver.
#[derive(Debug, Clone)]
pub struct CompactCommand {
    program: String,
    algorithm: String,
    low_priority: bool,
}

impl CompactCommand {
    pub fn new(program: impl Into<String>, algorithm: impl Into<String>, low_priority: bool) -> Self {
        Self {
            program: program.into(),
            algorithm: algorithm.into(),
            low_priority,
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::new(&config.program, &config.algorithm, config.low_priority)
    }

    /// `/c /exe:<ALGO> [/f] <path>`
    pub fn compress_args(&self, path: &Path, force: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["/c".into(), format!("/exe:{}", self.algorithm).into()];
        if force {
            args.push("/f".into());
        }
        args.push(path.as_os_str().to_owned());
        args
    }

    /// `/u <path>`
    pub fn remove_flag_args(&self, path: &Path) -> Vec<OsString> {
        vec!["/u".into(), path.as_os_str().to_owned()]
    }

    fn run(&self, args: Vec<OsString>) -> io::Result<Invocation> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        if self.low_priority {
            use std::os::windows::process::CommandExt;
            use windows_sys::Win32::System::Threading::{
                BELOW_NORMAL_PRIORITY_CLASS, CREATE_NO_WINDOW,
            };
            command.creation_flags(BELOW_NORMAL_PRIORITY_CLASS | CREATE_NO_WINDOW);
        }

        let child = command.spawn()?;

        #[cfg(unix)]
        if self.low_priority {
            lower_priority(child.id());
        }

        let output = child.wait_with_output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim_end();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }

        Ok(Invocation {
            success: output.status.success(),
            output: text,
        })
    }
}

impl Compressor for CompactCommand {
    fn compress(&self, path: &Path, force: bool) -> io::Result<Invocation> {
        self.run(self.compress_args(path, force))
    }

    fn remove_directory_flag(&self, path: &Path) -> io::Result<Invocation> {
        self.run(self.remove_flag_args(path))
    }
}

#[cfg(unix)]
const NICE_LEVEL: libc::c_int = 10;

/// Best-effort renice of a freshly spawned child.
#[cfg(unix)]
fn lower_priority(pid: u32) {
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, NICE_LEVEL) };
    if rc != 0 {
        crate::utils::warn_once(format!(
            "Could not lower compressor priority: {}",
            io::Error::last_os_error()
        ));
    }
}
