//! Update orchestrator.
//!
//! Sequences one apply end to end: recovery preflight, manifest fetch and
//! signature gate, version gate, diff plan, backup-first apply, extras
//! deletion, local manifest persist, state transition and reboot. Any
//! failure after the `installing` marker is written rolls the device back
//! to its pre-update files.
//!
//! Durable state lives entirely in the filesystem (state marker, local
//! manifest, backup directory); the updater instance itself can be
//! dropped and rebuilt at any point.

use crate::backup::BackupManager;
use crate::config::{DeletePolicy, OtaConfig};
use crate::download::Downloader;
use crate::error::{ErrorCode, OtaError};
use crate::events::{NullProgress, ProgressEvent, ProgressSink, UpdateMode};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::fsutil;
use crate::httpfs::HttpFsSession;
use crate::manifest::{Manifest, ManifestStore};
use crate::plan::{self, Action, Plan};
use crate::policy::DeleteExtrasPolicy;
use crate::state::{OtaState, StateStore};
use crate::verify;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Free-space fraction below which the preflight logs a warning.
const LOW_FREE_SPACE_RATIO: f64 = 0.40;

/// Abstract reboot primitive invoked after commit and after revert.
pub trait RebootHook {
    fn reboot(&self);
}

/// Default hook: logs and carries on. Real devices install a hook that
/// resets the hardware and never returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReboot;

impl RebootHook for NoopReboot {
    fn reboot(&self) {
        info!("reboot requested; no reboot hook installed");
    }
}

/// Result of one `check_and_perform_ota` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Local and remote versions match; nothing changed.
    UpToDate,
    /// An update was applied and awaits confirmation.
    Applied,
    /// A prior interrupted install was rolled back; no new check ran.
    RecoveredFromInterrupted,
    /// A previous update still awaits confirmation; refused to start.
    ConfirmPending,
}

/// The device-side update engine.
pub struct OtaUpdater {
    cfg: OtaConfig,
    state: StateStore,
    manifests: ManifestStore,
    backup: BackupManager,
    fetcher: Option<Box<dyn Fetcher>>,
    progress: Box<dyn ProgressSink>,
    reboot: Box<dyn RebootHook>,
    last_error: Option<(ErrorCode, String)>,
    created_files: Vec<PathBuf>,
}

impl OtaUpdater {
    /// Build an updater from configuration. The config is normalized
    /// here; unknown options were already collected into its sink.
    pub fn new(mut cfg: OtaConfig) -> Result<Self, OtaError> {
        cfg.normalize();

        if cfg.base_file_url.is_empty() {
            return Err(OtaError::Apply("base_file_url is required".to_string()));
        }
        if !cfg.recurse_http_fs && cfg.manifest_url.as_deref().unwrap_or("").is_empty() {
            return Err(OtaError::Apply(
                "manifest_url is required in manifest mode".to_string(),
            ));
        }
        if cfg.recurse_http_fs {
            cfg.manifest_url = None;
        }

        let state = StateStore::new(cfg.resolve(&cfg.ota_state_file));
        let manifests = ManifestStore::new(cfg.resolve(&cfg.local_manifest_file));
        let backup = BackupManager::new(
            cfg.backup_dir(),
            cfg.dest_dir.clone(),
            cfg.backup_skip_extensions.clone(),
            cfg.backup_skip_prefixes.clone(),
            cfg.io_chunk_size,
        );
        let fetcher = HttpFetcher::new(cfg.http_timeout_s)
            .map_err(|e| OtaError::Apply(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            cfg,
            state,
            manifests,
            backup,
            fetcher: Some(Box::new(fetcher)),
            progress: Box::new(NullProgress),
            reboot: Box::new(NoopReboot),
            last_error: None,
            created_files: Vec::new(),
        })
    }

    /// Replace the transport (tests, custom stacks).
    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Install a progress sink.
    pub fn with_progress(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Install a reboot hook.
    pub fn with_reboot(mut self, hook: Box<dyn RebootHook>) -> Self {
        self.reboot = hook;
        self
    }

    pub fn config(&self) -> &OtaConfig {
        &self.cfg
    }

    /// Current durable lifecycle state.
    pub fn current_state(&self) -> OtaState {
        self.state.read()
    }

    /// Code of the most recent failure, if any.
    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.last_error.as_ref().map(|(code, _)| *code)
    }

    /// Detail message of the most recent failure, if any.
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_ref().map(|(_, msg)| msg.as_str())
    }

    /// Entry point: recover from interruption if needed, otherwise check
    /// the remote side and apply any pending update.
    pub fn check_and_perform_ota(&mut self) -> Result<UpdateOutcome, OtaError> {
        self.last_error = None;

        let result = match self.state.read() {
            OtaState::Installing => {
                warn!("incomplete update detected; reverting to backup");
                self.revert_update().map(|_| UpdateOutcome::RecoveredFromInterrupted)
            }
            OtaState::ConfirmPending => {
                info!("pending update confirmation; confirm or revert before the next check");
                Ok(UpdateOutcome::ConfirmPending)
            }
            OtaState::Idle => {
                if self.cfg.recurse_http_fs {
                    self.run_http_fs()
                } else {
                    self.run_manifest()
                }
            }
        };

        if let Err(e) = &result {
            self.last_error = Some((e.code(), e.to_string()));
            error!(code = e.code().as_str(), error = %e, "ota update failed");
        }
        result
    }

    /// Mark a pending update as confirmed by the application. Returns
    /// `false` when no confirmation is pending.
    pub fn confirm_update(&mut self, cleanup: bool) -> bool {
        if self.state.read() != OtaState::ConfirmPending {
            return false;
        }
        if let Err(e) = self.state.write(OtaState::Idle) {
            error!(error = %e, "failed to clear ota state on confirm");
            return false;
        }
        info!("update confirmed");
        if cleanup {
            if let Err(e) = self.backup.destroy() {
                warn!(error = %e, "best-effort backup cleanup failed");
            }
        }
        true
    }

    /// Remove the backup directory. Returns `false` without acting when a
    /// confirmation is still pending or there was nothing to remove.
    pub fn cleanup_files(&mut self) -> bool {
        if self.state.read() == OtaState::ConfirmPending {
            warn!("cleanup blocked: update confirmation is still pending");
            return false;
        }
        if !self.backup.exists() {
            return false;
        }
        match self.backup.destroy() {
            Ok(()) => {
                info!(dir = %self.backup.backup_dir().display(), "removed backup directory");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to remove backup directory");
                false
            }
        }
    }

    /// Restore every backed-up file, drop files created by the in-flight
    /// attempt, reset state to idle and reboot.
    pub fn revert_update(&mut self) -> Result<(), OtaError> {
        warn!("reverting update from backup");
        if self.backup.exists() {
            self.backup.restore_all()?;
        }

        // Files created by this attempt have no backup copy to restore;
        // remove them. After a reboot the list is empty and created files
        // are left in place.
        let created = std::mem::take(&mut self.created_files);
        for path in created {
            let rel = path
                .strip_prefix(&self.cfg.dest_dir)
                .ok()
                .map(fsutil::to_posix);
            let in_backup = rel.as_deref().map(|r| self.backup.contains(r)).unwrap_or(false);
            if !in_backup && path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove created file");
                }
            }
        }

        self.backup.destroy()?;
        self.state.write(OtaState::Idle)?;
        info!("reversion complete, rebooting");
        self.reboot.reboot();
        Ok(())
    }

    /// Best-effort teardown of retained resources. No durable effect; a
    /// released updater fails further update checks until rebuilt.
    pub fn release(&mut self) {
        self.fetcher = None;
        self.created_files = Vec::new();
        debug!("updater resources released");
    }

    // --- manifest mode ---

    fn run_manifest(&mut self) -> Result<UpdateOutcome, OtaError> {
        self.progress.emit(&ProgressEvent::UpdateStart {
            mode: UpdateMode::Manifest,
        });

        let url = self
            .cfg
            .manifest_url
            .clone()
            .unwrap_or_default();
        info!(url = %url, "fetching manifest");
        let bytes = self.fetch_manifest_bytes(&url)?;
        let value = Manifest::parse_value(&bytes)?;

        if let Some(key) = self.cfg.manifest_auth_key.clone() {
            verify::verify_manifest_signature(&value, &self.cfg.manifest_signature_field, &key)?;
        }
        let remote = Manifest::from_value(&value)?;
        let local = self.manifests.load();

        if remote.version == local.version && !self.cfg.force_update {
            info!(version = %local.version, "no update needed");
            return Ok(UpdateOutcome::UpToDate);
        }
        info!(local = %local.version, remote = %remote.version, "update available");

        self.warn_if_low_free_space();
        let delete_candidates = self.delete_candidates(&remote);
        let plan = plan::build_plan(&remote, &local, delete_candidates, self.cfg.force_update);

        self.state.write(OtaState::Installing)?;
        self.created_files.clear();

        let applied = self
            .apply_plan(&plan, &bytes)
            .and_then(|()| self.state.write(OtaState::ConfirmPending).map_err(OtaError::from));

        match applied {
            Ok(()) => {
                self.progress.emit(&ProgressEvent::UpdateApplied {
                    mode: UpdateMode::Manifest,
                });
                info!("update applied, rebooting");
                self.reboot.reboot();
                Ok(UpdateOutcome::Applied)
            }
            Err(e) => {
                error!(error = %e, "update failed, reverting");
                if let Err(revert_err) = self.revert_update() {
                    error!(error = %revert_err, "revert after failed update also failed");
                }
                Err(e)
            }
        }
    }

    fn apply_plan(&mut self, plan: &Plan, raw_manifest: &[u8]) -> Result<(), OtaError> {
        self.backup.prepare()?;

        let total = plan.file_total();
        let policy_tag = self.cfg.delete_files_not_in_manifest_policy;
        let mut index = 0usize;

        for action in &plan.actions {
            match action {
                Action::Download { path, from, to, md5 } => {
                    index += 1;
                    self.progress.emit(&ProgressEvent::FileUpdateStart {
                        path: path.clone(),
                        mode: UpdateMode::Manifest,
                        index: Some(index),
                        total: Some(total),
                        from: from.clone(),
                        to: Some(to.clone()),
                    });
                    info!(path = %path, from = ?from, to = %to, "updating file");

                    let dest = self.cfg.dest_dir.join(path);
                    if !dest.exists() {
                        self.created_files.push(dest.clone());
                    }
                    self.backup.backup_if_needed(path)?;

                    let url = join_url(&self.cfg.base_file_url, path);
                    let fetcher = self
                        .fetcher
                        .as_deref()
                        .ok_or_else(|| OtaError::Apply("updater released".to_string()))?;
                    let downloader = Downloader {
                        fetcher,
                        progress: self.progress.as_ref(),
                        retries: self.cfg.download_retries,
                        retry_base_delay_ms: self.cfg.retry_base_delay_ms,
                        io_chunk_size: self.cfg.io_chunk_size,
                        md5_chunk_size: self.cfg.md5_chunk_size,
                        resume: self.cfg.resume_downloads,
                    };
                    downloader.download(&url, &dest, md5.as_deref())?;
                    if md5.is_none() {
                        warn!(path = %path, "no md5 in manifest, skipping verification");
                    }

                    self.progress.emit(&ProgressEvent::FileUpdateDone {
                        path: path.clone(),
                        mode: UpdateMode::Manifest,
                        index: Some(index),
                        total: Some(total),
                    });
                }
                Action::Skip { path, version } => {
                    index += 1;
                    debug!(path = %path, version = %version, "file is up to date");
                    self.progress.emit(&ProgressEvent::FileUpdateSkip {
                        path: path.clone(),
                        index,
                        total,
                    });
                }
                Action::DeleteExtra { path } => {
                    match self.delete_extraneous(path) {
                        Ok(()) => {
                            info!(path = %path, policy = policy_tag.as_str(), "deleted file not present in manifest");
                            self.progress.emit(&ProgressEvent::FileDeleteExtra {
                                path: path.clone(),
                                policy: policy_tag,
                            });
                        }
                        Err(e) => {
                            // Non-fatal: record, log and carry on.
                            warn!(path = %path, error = %e, "failed to delete extraneous file, skipping");
                            self.last_error =
                                Some((ErrorCode::DeleteExtraneousFailed, e.to_string()));
                        }
                    }
                }
            }
        }

        self.manifests.save_bytes(raw_manifest)?;
        Ok(())
    }

    fn delete_extraneous(&self, rel_path: &str) -> Result<(), OtaError> {
        let active = self.cfg.dest_dir.join(rel_path);
        if !active.is_file() {
            return Ok(());
        }
        self.backup
            .backup_if_needed(rel_path)
            .map_err(|e| OtaError::DeleteExtraneous(format!("{}: {}", rel_path, e)))?;
        fs::remove_file(&active)
            .map_err(|e| OtaError::DeleteExtraneous(format!("{}: {}", rel_path, e)))
    }

    /// Extraneous-file candidates under `dest_dir`, already filtered by
    /// the delete policy. Engine artifacts are never candidates.
    fn delete_candidates(&self, remote: &Manifest) -> Vec<String> {
        if self.cfg.delete_files_not_in_manifest_policy == DeletePolicy::Never {
            return Vec::new();
        }
        if !self.cfg.dest_dir.is_dir() {
            return Vec::new();
        }
        let policy = DeleteExtrasPolicy::new(
            self.cfg.delete_files_not_in_manifest_policy,
            &self.cfg.delete_files_not_in_manifest_extensions,
            remote,
        );
        let backup_prefix = format!("{}_backup/", self.cfg.application_name);

        fsutil::collect_relative_files(&self.cfg.dest_dir)
            .into_iter()
            .filter(|rel| {
                if remote.files.contains_key(rel) || rel.starts_with(&backup_prefix) {
                    return false;
                }
                let abs = self.cfg.dest_dir.join(rel);
                if abs == self.state.path() || abs == self.manifests.path() {
                    return false;
                }
                policy.should_delete(rel)
            })
            .collect()
    }

    fn fetch_manifest_bytes(&self, url: &str) -> Result<Vec<u8>, OtaError> {
        let fetcher = self
            .fetcher
            .as_deref()
            .ok_or_else(|| OtaError::Apply("updater released".to_string()))?;
        let attempts = self.cfg.download_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match fetch_bytes_once(fetcher, url, self.cfg.io_chunk_size) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < attempts {
                        let wait_ms = self
                            .cfg
                            .retry_base_delay_ms
                            .saturating_mul(1u64 << attempt.min(20));
                        warn!(url, attempt = attempt + 1, wait_ms, error = %last_error, "manifest fetch failed, retrying");
                        thread::sleep(Duration::from_millis(wait_ms));
                    }
                }
            }
        }
        Err(OtaError::ManifestFetch(format!("{}: {}", url, last_error)))
    }

    fn warn_if_low_free_space(&self) {
        match fsutil::free_space_ratio(&self.cfg.dest_dir) {
            Some(ratio) if ratio < LOW_FREE_SPACE_RATIO => {
                warn!(
                    used_pct = ((1.0 - ratio) * 100.0) as u32,
                    free_pct = (ratio * 100.0) as u32,
                    "low free space before ota backup"
                );
            }
            Some(_) => {}
            None => debug!("unable to compute filesystem free-space ratio"),
        }
    }

    // --- http-fs mode ---

    fn run_http_fs(&mut self) -> Result<UpdateOutcome, OtaError> {
        self.progress.emit(&ProgressEvent::UpdateStart {
            mode: UpdateMode::HttpFs,
        });
        self.warn_if_low_free_space();

        self.state.write(OtaState::Installing)?;
        self.created_files.clear();

        let applied = self
            .http_fs_apply()
            .and_then(|count| {
                info!(count, "http-fs download pass complete");
                self.state.write(OtaState::ConfirmPending).map_err(OtaError::from)
            });

        match applied {
            Ok(()) => {
                self.progress.emit(&ProgressEvent::UpdateApplied {
                    mode: UpdateMode::HttpFs,
                });
                info!("http-fs update applied, rebooting");
                self.reboot.reboot();
                Ok(UpdateOutcome::Applied)
            }
            Err(e) => {
                error!(error = %e, "http-fs update failed, reverting");
                if let Err(revert_err) = self.revert_update() {
                    error!(error = %revert_err, "revert after failed update also failed");
                }
                Err(e)
            }
        }
    }

    fn http_fs_apply(&mut self) -> Result<usize, OtaError> {
        self.backup.prepare()?;

        let base = self.cfg.base_file_url.clone();
        let mut created = Vec::new();
        let result;
        {
            let fetcher = self
                .fetcher
                .as_deref()
                .ok_or_else(|| OtaError::Apply("updater released".to_string()))?;
            let downloader = Downloader {
                fetcher,
                progress: self.progress.as_ref(),
                retries: self.cfg.download_retries,
                retry_base_delay_ms: self.cfg.retry_base_delay_ms,
                io_chunk_size: self.cfg.io_chunk_size,
                md5_chunk_size: self.cfg.md5_chunk_size,
                resume: self.cfg.resume_downloads,
            };
            let session = HttpFsSession {
                fetcher,
                progress: self.progress.as_ref(),
                backup: &self.backup,
                dest_dir: &self.cfg.dest_dir,
                downloader,
                strict: self.cfg.strict_http_fs,
                io_chunk_size: self.cfg.io_chunk_size,
            };
            result = session.run(&base, &mut created);
        }
        // Track created files even when the crawl failed so revert can
        // remove them.
        self.created_files.extend(created);
        result
    }
}

/// Join a base URL and a relative path with exactly one slash.
fn join_url(base: &str, rel_path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rel_path)
}

fn fetch_bytes_once(fetcher: &dyn Fetcher, url: &str, chunk_size: usize) -> Result<Vec<u8>, String> {
    let response = fetcher.get(url, None).map_err(|e| e.to_string())?;
    if !response.is_success() {
        return Err(format!("HTTP {}", response.status));
    }
    let mut bytes = Vec::new();
    let mut reader = response.body;
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut buf).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..n]);
    }
    Ok(bytes)
}
