//! Durable updater state marker.
//!
//! A one-token file is the only record of where the updater is in its
//! lifecycle; recovery after power loss keys entirely off it. Writes go
//! through a temp file and rename so a crash never leaves a torn marker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lifecycle states of the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaState {
    /// No update in progress.
    #[default]
    Idle,
    /// Destructive filesystem mutation may be underway.
    Installing,
    /// An update was applied and awaits application confirmation.
    ConfirmPending,
}

impl OtaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtaState::Idle => "idle",
            OtaState::Installing => "installing",
            OtaState::ConfirmPending => "confirm_pending",
        }
    }

    /// Parse marker content. Unrecognized content reads as `Idle`.
    pub fn parse(content: &str) -> OtaState {
        match content.trim() {
            "idle" => OtaState::Idle,
            "installing" => OtaState::Installing,
            "confirm_pending" => OtaState::ConfirmPending,
            other => {
                if !other.is_empty() {
                    warn!(content = other, "unrecognized ota state marker, treating as idle");
                }
                OtaState::Idle
            }
        }
    }
}

/// Reads and writes the state marker file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state; a missing or unreadable marker reads as `Idle`.
    pub fn read(&self) -> OtaState {
        match fs::read_to_string(&self.path) {
            Ok(content) => OtaState::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => OtaState::Idle,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read ota state marker");
                OtaState::Idle
            }
        }
    }

    /// Durably record `state` with write-then-rename.
    pub fn write(&self, state: OtaState) -> io::Result<()> {
        crate::fsutil::ensure_parent_dir(&self.path)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, state.as_str())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_marker_reads_idle() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("ota_state.txt"));
        assert_eq!(store.read(), OtaState::Idle);
    }

    #[test]
    fn test_round_trip_all_states() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("ota_state.txt"));
        for state in [OtaState::Idle, OtaState::Installing, OtaState::ConfirmPending] {
            store.write(state).unwrap();
            assert_eq!(store.read(), state);
        }
    }

    #[test]
    fn test_unrecognized_content_reads_idle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_state.txt");
        fs::write(&path, "rebooting\n").unwrap();
        let store = StateStore::new(path);
        assert_eq!(store.read(), OtaState::Idle);
    }

    #[test]
    fn test_trailing_whitespace_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_state.txt");
        fs::write(&path, "confirm_pending\n").unwrap();
        let store = StateStore::new(path);
        assert_eq!(store.read(), OtaState::ConfirmPending);
    }

    #[test]
    fn test_no_stale_temp_file_after_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_state.txt");
        let store = StateStore::new(path.clone());
        store.write(OtaState::Installing).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
