//! Manifest builder - scans a source tree into an OTA manifest.
//!
//! Produces the wire format consumed by devices: a mapping of relative
//! POSIX paths to per-file version strings and MD5 digests, with an
//! optional HMAC-SHA256 signature. Canonicalization for signing is shared
//! with the device engine, so host and device agree bytewise.

use crate::cli::{BuildOpts, VersionSource};
use anyhow::{Context, Result};
use rova_core::manifest::ManifestStore;
use rova_core::{fsutil, verify, Manifest, ManifestEntry};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Chunk size for host-side hashing; hosts are not RAM-limited.
const HASH_CHUNK_SIZE: usize = 4096;

/// Scans a source directory and generates manifests.
pub struct ManifestBuilder {
    src_dir: PathBuf,
    include_extensions: Vec<String>,
    exclude_prefixes: Vec<String>,
    exclude_dirs: Vec<String>,
    version_source: VersionSource,
    reuse_unchanged: bool,
    previous_manifest: Option<PathBuf>,
    manifest_version: Option<String>,
    auth_key: Option<String>,
    signature_field: String,
}

impl ManifestBuilder {
    pub fn from_opts(opts: &BuildOpts, default_previous: Option<&Path>) -> Self {
        Self {
            src_dir: opts.src.clone(),
            include_extensions: rova_core::config::normalize_extensions(&opts.include_ext),
            exclude_prefixes: opts.exclude_prefix.clone(),
            exclude_dirs: opts.exclude_dir.clone(),
            version_source: opts.version_source,
            reuse_unchanged: opts.reuse_unchanged,
            previous_manifest: opts
                .previous
                .clone()
                .or_else(|| default_previous.map(Path::to_path_buf)),
            manifest_version: opts.manifest_version.clone(),
            auth_key: opts.auth_key.clone(),
            signature_field: opts.signature_field.clone(),
        }
    }

    /// Generate the manifest as a JSON value, signed when a key is
    /// configured.
    pub fn build(&self) -> Result<serde_json::Value> {
        let manifest = self.scan()?;
        let mut value = serde_json::to_value(&manifest).context("failed to serialize manifest")?;
        if let Some(key) = &self.auth_key {
            let signature = verify::manifest_signature(&value, &self.signature_field, key)
                .context("failed to sign manifest")?;
            value[self.signature_field.as_str()] = serde_json::Value::String(signature);
        }
        Ok(value)
    }

    /// Generate the manifest and write it to `out` atomically, pretty
    /// printed.
    pub fn write_manifest(&self, out: &Path) -> Result<()> {
        let value = self.build()?;
        let mut body = serde_json::to_string_pretty(&value)?;
        body.push('\n');

        if let Some(parent) = out.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = out.with_extension("tmp");
        fs::write(&tmp, &body).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, out).with_context(|| format!("failed to rename into {}", out.display()))?;
        info!(out = %out.display(), "wrote manifest");
        Ok(())
    }

    fn scan(&self) -> Result<Manifest> {
        let previous = if self.reuse_unchanged {
            self.previous_manifest
                .as_ref()
                .map(|path| ManifestStore::new(path.clone()).load())
                .unwrap_or_default()
        } else {
            Manifest::default()
        };

        let mut manifest = Manifest::default();
        let walker = WalkDir::new(&self.src_dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir() && self.is_excluded_dir(entry.file_name()))
            });

        for entry in walker {
            let entry = entry.context("failed to walk source directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.src_dir)
                .context("walked file outside source root")?;
            let rel_path = fsutil::to_posix(rel);

            if !self.includes(&rel_path, entry.file_name()) {
                continue;
            }

            let md5 = verify::file_md5(entry.path(), HASH_CHUNK_SIZE)
                .with_context(|| format!("failed to hash {}", entry.path().display()))?;

            let version = match previous.files.get(&rel_path) {
                Some(prev) if prev.md5.as_deref() == Some(md5.as_str()) => {
                    debug!(path = %rel_path, "content unchanged, keeping previous version");
                    prev.version.clone()
                }
                _ => self.file_version(entry.path())?,
            };

            manifest.files.insert(
                rel_path.clone(),
                ManifestEntry {
                    path: rel_path,
                    version,
                    md5: Some(md5),
                },
            );
        }

        manifest.version = match &self.manifest_version {
            Some(v) => v.clone(),
            None => highest_version(manifest.files.values().map(|e| e.version.as_str())),
        };
        info!(
            version = %manifest.version,
            files = manifest.files.len(),
            "scanned source tree"
        );
        Ok(manifest)
    }

    fn is_excluded_dir(&self, name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        self.exclude_dirs.iter().any(|d| *d == name)
    }

    fn includes(&self, rel_path: &str, file_name: &std::ffi::OsStr) -> bool {
        let name = file_name.to_string_lossy();
        if self.exclude_prefixes.iter().any(|p| name.starts_with(p)) {
            return false;
        }
        if self.include_extensions.is_empty() {
            return true;
        }
        let ext = fsutil::path_extension(rel_path);
        !ext.is_empty() && self.include_extensions.contains(&ext)
    }

    fn file_version(&self, path: &Path) -> Result<String> {
        if self.version_source == VersionSource::GitCommitTime {
            if let Some(ts) = git_commit_time(path) {
                return Ok(ts);
            }
            warn!(path = %path.display(), "no git commit time, falling back to mtime");
        }
        mtime_version(path)
    }
}

fn mtime_version(path: &Path) -> Result<String> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(secs.to_string())
}

fn git_commit_time(path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%ct", "--"])
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let ts = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if ts.is_empty() {
        return None;
    }
    ts.parse::<u64>().ok()?;
    Some(ts)
}

/// Highest version among the entries: numeric when every version parses
/// as an integer, lexicographic otherwise. Empty input yields "0".
fn highest_version<'a>(versions: impl Iterator<Item = &'a str>) -> String {
    let versions: Vec<&str> = versions.collect();
    if versions.is_empty() {
        return "0".to_string();
    }
    let numeric: Option<Vec<u64>> = versions.iter().map(|v| v.parse::<u64>().ok()).collect();
    match numeric {
        Some(nums) => nums.into_iter().max().unwrap_or(0).to_string(),
        None => versions
            .into_iter()
            .max()
            .unwrap_or("0")
            .to_string(),
    }
}
