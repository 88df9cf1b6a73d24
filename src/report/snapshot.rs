// Per-trial safety snapshot.
//
// The session log is flushed to a dot-file after every trial so a crash or
// power loss mid-session loses at most the trial in flight. A clean
// session end removes the file; one found at startup is data from an
// interrupted run.

use crate::error::Result;
use crate::session::types::SessionLog;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = ".sst-session.json";

pub struct TempSnapshot {
    path: PathBuf,
}

impl TempSnapshot {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the snapshot with the current session log.
    pub fn persist(&self, log: &SessionLog) -> Result<()> {
        let bytes = serde_json::to_vec(log)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Load a leftover snapshot, if any.
    pub fn recover(&self) -> Result<Option<SessionLog>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Remove the snapshot after a clean session end.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
