//! Per-file decision state machine.
//!
//! Each file ends in exactly one [`Outcome`]. The checks run in a fixed order:
//! excluded extension, OS system attribute, unchanged since the last run,
//! zero length, and finally compression. Every file with an outcome
//! contributes its logical size once and its physical size once; a processed
//! file contributes the size measured after compression. A failed file
//! contributes neither.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::cache::{ChangeCache, PathIdentity};
use crate::compressor::Compressor;
use crate::filter::ExtensionFilter;
use crate::stats::RunStatistics;
use crate::types::{FileProbe, Outcome};
use crate::volume::Volume;

pub struct FileDecisionEngine {
    cache: Arc<ChangeCache>,
    stats: Arc<RunStatistics>,
    compressor: Arc<dyn Compressor>,
    volume: Arc<dyn Volume>,
    skip: ExtensionFilter,
}

impl FileDecisionEngine {
    pub fn new(
        cache: Arc<ChangeCache>,
        stats: Arc<RunStatistics>,
        compressor: Arc<dyn Compressor>,
        volume: Arc<dyn Volume>,
        skip: ExtensionFilter,
    ) -> Self {
        Self {
            cache,
            stats,
            compressor,
            volume,
            skip,
        }
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Handle one file, absorbing any error into the failure count.
    pub fn visit(&self, path: &Path) -> Option<Outcome> {
        match self.handle(path) {
            Ok(outcome) => {
                debug!(path = %path.display(), outcome = outcome.label(), "file handled");
                Some(outcome)
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(path = %path.display(), "Failed to handle file: {e:#}");
                None
            }
        }
    }

    pub fn handle(&self, path: &Path) -> Result<Outcome> {
        let probe = self
            .volume
            .probe(path)
            .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
        let identity = PathIdentity::new(path);

        let outcome = if self.skip.matches(path) {
            Outcome::SkippedExtension
        } else if probe.system {
            Outcome::SkippedAttribute
        } else if self.cache.is_unchanged(identity, probe.logical) {
            Outcome::SkippedUnchanged
        } else if probe.logical == 0 {
            Outcome::Empty
        } else {
            self.compress(path, identity, &probe)?;
            self.stats.record(Outcome::Processed);
            return Ok(Outcome::Processed);
        };

        self.stats.add_logical(probe.logical);
        self.stats.add_physical(probe.physical);
        self.stats.record(outcome);
        Ok(outcome)
    }

    fn compress(&self, path: &Path, identity: PathIdentity, before: &FileProbe) -> Result<()> {
        let force = before.compressed;
        if force {
            self.volume.clear_compressed(path).with_context(|| {
                format!("Failed to clear compression marking on {}", path.display())
            })?;
        }

        match self.compressor.compress(path, force) {
            Ok(invocation) if invocation.success => {
                debug!(path = %path.display(), force, output = %invocation.output, "compressed");
            }
            Ok(invocation) => {
                warn!(
                    path = %path.display(),
                    output = %invocation.output,
                    "Compressor exited with failure status"
                );
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to run compressor: {e}");
            }
        }

        let after = self
            .volume
            .probe(path)
            .with_context(|| format!("Failed to re-measure {}", path.display()))?;

        self.cache.upsert(identity, after.logical);
        self.stats.add_logical(before.logical);
        self.stats.add_transfer(before.physical, after.physical);
        self.stats.add_physical(after.physical);

        if after.physical > before.physical {
            self.stats.record_inflation();
            warn!(
                path = %path.display(),
                before = before.physical,
                after = after.physical,
                "File grew on disk after compression"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
