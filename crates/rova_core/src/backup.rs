//! Backup-first file replacement.
//!
//! Every file the engine is about to overwrite or delete is first copied
//! into a backup directory mirroring the destination layout, unless its
//! extension or path prefix is in the configured skip sets. Restore walks
//! the backup tree back over the destination.

use crate::fsutil;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manages the `<application_name>_backup/` mirror.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    dest_dir: PathBuf,
    skip_extensions: Vec<String>,
    skip_prefixes: Vec<String>,
    io_chunk_size: usize,
}

impl BackupManager {
    pub fn new(
        backup_dir: PathBuf,
        dest_dir: PathBuf,
        skip_extensions: Vec<String>,
        skip_prefixes: Vec<String>,
        io_chunk_size: usize,
    ) -> Self {
        Self {
            backup_dir,
            dest_dir,
            skip_extensions,
            skip_prefixes,
            io_chunk_size,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn exists(&self) -> bool {
        self.backup_dir.is_dir()
    }

    /// Wipe any stale backup and create a fresh, empty directory.
    pub fn prepare(&self) -> io::Result<()> {
        fsutil::remove_dir_recursive(&self.backup_dir)?;
        fs::create_dir_all(&self.backup_dir)
    }

    /// Whether a relative path is exempt from backup. Exempt files are
    /// still mutated or removed.
    pub fn should_skip(&self, rel_path: &str) -> bool {
        let lower = rel_path.to_ascii_lowercase();
        if self.skip_extensions.iter().any(|ext| lower.ends_with(ext)) {
            debug!(path = rel_path, "skipping backup for binary asset");
            return true;
        }
        if self.skip_prefixes.iter().any(|p| rel_path.starts_with(p)) {
            debug!(path = rel_path, "skipping backup for asset directory prefix");
            return true;
        }
        false
    }

    /// Copy the destination file at `rel_path` into the backup mirror.
    /// Returns `false` when the file does not exist or is skip-listed.
    pub fn backup_if_needed(&self, rel_path: &str) -> io::Result<bool> {
        if self.should_skip(rel_path) {
            return Ok(false);
        }
        let active = self.dest_dir.join(rel_path);
        if !active.is_file() {
            return Ok(false);
        }
        let mirror = self.backup_dir.join(rel_path);
        fsutil::copy_file_chunked(&active, &mirror, self.io_chunk_size)?;
        debug!(from = %active.display(), to = %mirror.display(), "backed up file");
        Ok(true)
    }

    /// Whether a mirror copy of `rel_path` exists in the backup.
    pub fn contains(&self, rel_path: &str) -> bool {
        self.backup_dir.join(rel_path).is_file()
    }

    /// Restore every backed-up file to its original destination path,
    /// overwriting. Returns the number of files restored.
    pub fn restore_all(&self) -> io::Result<usize> {
        if !self.exists() {
            return Ok(0);
        }
        let files = fsutil::collect_relative_files(&self.backup_dir);
        for rel in &files {
            let src = self.backup_dir.join(rel);
            let dst = self.dest_dir.join(rel);
            fsutil::copy_file_chunked(&src, &dst, self.io_chunk_size)?;
        }
        info!(count = files.len(), "restored files from backup");
        Ok(files.len())
    }

    /// Remove the backup directory tree.
    pub fn destroy(&self) -> io::Result<()> {
        fsutil::remove_dir_recursive(&self.backup_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> BackupManager {
        BackupManager::new(
            dir.path().join("app_backup"),
            dir.path().to_path_buf(),
            vec![".png".into(), ".raw".into()],
            vec!["assets/".into()],
            64,
        )
    }

    #[test]
    fn test_backup_and_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.py"), "old contents").unwrap();

        mgr.prepare().unwrap();
        assert!(mgr.backup_if_needed("lib/util.py").unwrap());
        assert!(mgr.contains("lib/util.py"));

        // Clobber, then restore.
        fs::write(dir.path().join("lib/util.py"), "new contents").unwrap();
        assert_eq!(mgr.restore_all().unwrap(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("lib/util.py")).unwrap(),
            "old contents"
        );
    }

    #[test]
    fn test_skip_extension_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        fs::write(dir.path().join("logo.PNG"), [0u8; 16]).unwrap();
        mgr.prepare().unwrap();
        assert!(!mgr.backup_if_needed("logo.PNG").unwrap());
        assert!(!mgr.contains("logo.PNG"));
    }

    #[test]
    fn test_skip_prefix_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/data.txt"), "x").unwrap();
        mgr.prepare().unwrap();
        assert!(!mgr.backup_if_needed("assets/data.txt").unwrap());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.prepare().unwrap();
        assert!(!mgr.backup_if_needed("ghost.py").unwrap());
    }

    #[test]
    fn test_prepare_wipes_stale_backup() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.prepare().unwrap();
        fs::write(mgr.backup_dir().join("stale.py"), "stale").unwrap();
        mgr.prepare().unwrap();
        assert!(!mgr.contains("stale.py"));
    }

    #[test]
    fn test_destroy_removes_tree() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.prepare().unwrap();
        mgr.destroy().unwrap();
        assert!(!mgr.exists());
        // Destroying again is fine.
        mgr.destroy().unwrap();
    }
}
