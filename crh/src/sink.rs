//! Per-scenario output file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Append-only byte sink named after its scenario.
#[derive(Debug, Clone)]
pub struct Sink {
    path: PathBuf,
}

impl Sink {
    /// `{dir}/{prefix}{scenario}.es`
    pub fn for_scenario(dir: &Path, prefix: &str, scenario: &str) -> Self {
        Self {
            path: dir.join(format!("{prefix}{scenario}.es")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove output left by a previous run.
    pub fn reset(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed stale sink file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove sink file"),
        }
    }

    fn try_append(&self, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(data)?;
        file.flush()
    }

    /// Append `data`. Failures are logged and reported as `false`.
    pub fn append(&self, data: &[u8]) -> bool {
        match self.try_append(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to persist output buffer");
                false
            }
        }
    }
}
