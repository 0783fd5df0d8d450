//! Updater configuration.
//!
//! Every option the engine recognizes lives in [`OtaConfig`]; unknown
//! options found when deserializing a config document are collected into
//! the `extra` sink and ignored, so older devices accept newer configs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Default chunk size for copy, download and hashing loops.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default number of retries after the first failed download attempt.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 1;

/// Default exponential backoff base in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_S: u64 = 5;

/// Extensions never copied into the backup directory (binary assets that
/// are cheap to re-download and expensive to duplicate on small flash).
pub const DEFAULT_BACKUP_SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".rgb565", ".raw", ".bin", ".ttf", ".otf", ".woff",
];

/// Path prefixes never copied into the backup directory.
pub const DEFAULT_BACKUP_SKIP_PREFIXES: &[&str] =
    &["assets/", "static/", "media/", "images/", "fonts/"];

/// Policy for deleting local files absent from the remote manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Never delete anything.
    #[default]
    Never,
    /// Delete when the extension is in the allowlist and also appears in
    /// the remote manifest.
    ManifestExtensions,
    /// Delete when the extension is in the allowlist.
    CustomExtensions,
    /// Delete every extraneous file under the destination root.
    All,
}

impl DeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePolicy::Never => "never",
            DeletePolicy::ManifestExtensions => "manifest_extensions",
            DeletePolicy::CustomExtensions => "custom_extensions",
            DeletePolicy::All => "all",
        }
    }
}

/// Construction-time options for [`crate::updater::OtaUpdater`].
///
/// All fields have defaults so a config document only needs to name what
/// it changes. Relative `ota_state_file` and `local_manifest_file` paths
/// resolve under `dest_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// URL of the remote manifest; unused in HTTP-FS mode.
    pub manifest_url: Option<String>,

    /// Base URL prepended to per-file paths for downloads, and the crawl
    /// root in HTTP-FS mode.
    pub base_file_url: String,

    /// Root directory for applied files.
    pub dest_dir: PathBuf,

    /// Apply even when manifest versions match.
    pub force_update: bool,

    /// Crawl `base_file_url` as a directory listing instead of consuming
    /// a manifest.
    pub recurse_http_fs: bool,

    /// Durable state marker file.
    pub ota_state_file: PathBuf,

    /// Local copy of the last successfully applied manifest.
    pub local_manifest_file: PathBuf,

    /// Derives the backup directory name (`<application_name>_backup`).
    pub application_name: String,

    /// Per-request HTTP timeout in seconds; `None` disables the timeout.
    pub http_timeout_s: Option<u64>,

    /// Extensions excluded from backup (still mutated/removed).
    pub backup_skip_extensions: Vec<String>,

    /// Path prefixes excluded from backup (still mutated/removed).
    pub backup_skip_prefixes: Vec<String>,

    /// Shared secret for manifest HMAC-SHA256 verification.
    pub manifest_auth_key: Option<String>,

    /// Manifest field holding the signature hex.
    pub manifest_signature_field: String,

    /// Retries after the first failed download attempt.
    pub download_retries: u32,

    /// Exponential backoff base between retries, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Attempt HTTP range resume via `.part` files.
    pub resume_downloads: bool,

    /// Chunk size for copy and download loops, in bytes.
    pub io_chunk_size: usize,

    /// Chunk size for MD5 verification, in bytes.
    pub md5_chunk_size: usize,

    /// Abort an HTTP-FS update when any single file fails.
    pub strict_http_fs: bool,

    /// Policy for deleting local files missing from the manifest.
    pub delete_files_not_in_manifest_policy: DeletePolicy,

    /// Extension allowlist for the extension-scoped delete policies.
    pub delete_files_not_in_manifest_extensions: Vec<String>,

    /// Unknown options are accepted and ignored for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            manifest_url: None,
            base_file_url: String::new(),
            dest_dir: PathBuf::from("."),
            force_update: false,
            recurse_http_fs: false,
            ota_state_file: PathBuf::from("ota_state.txt"),
            local_manifest_file: PathBuf::from("versions.json"),
            application_name: "rova".to_string(),
            http_timeout_s: Some(DEFAULT_HTTP_TIMEOUT_S),
            backup_skip_extensions: DEFAULT_BACKUP_SKIP_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_skip_prefixes: DEFAULT_BACKUP_SKIP_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            manifest_auth_key: None,
            manifest_signature_field: "signature".to_string(),
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            resume_downloads: false,
            io_chunk_size: DEFAULT_CHUNK_SIZE,
            md5_chunk_size: DEFAULT_CHUNK_SIZE,
            strict_http_fs: true,
            delete_files_not_in_manifest_policy: DeletePolicy::Never,
            delete_files_not_in_manifest_extensions: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl OtaConfig {
    /// Canonicalize collections and degrade inconsistent settings.
    ///
    /// Called once at updater construction. Extension lists become
    /// lowercase with a leading dot; zero chunk sizes fall back to the
    /// defaults; extension-scoped delete policies without an allowlist
    /// degrade to `never`.
    pub fn normalize(&mut self) {
        self.backup_skip_extensions = normalize_extensions(&self.backup_skip_extensions);
        self.delete_files_not_in_manifest_extensions =
            normalize_extensions(&self.delete_files_not_in_manifest_extensions);

        if self.io_chunk_size == 0 {
            self.io_chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.md5_chunk_size == 0 {
            self.md5_chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.retry_base_delay_ms == 0 {
            self.retry_base_delay_ms = DEFAULT_RETRY_BASE_DELAY_MS;
        }

        let extension_scoped = matches!(
            self.delete_files_not_in_manifest_policy,
            DeletePolicy::ManifestExtensions | DeletePolicy::CustomExtensions
        );
        if extension_scoped && self.delete_files_not_in_manifest_extensions.is_empty() {
            warn!(
                policy = self.delete_files_not_in_manifest_policy.as_str(),
                "delete policy requires an explicit extension allowlist; disabling delete policy"
            );
            self.delete_files_not_in_manifest_policy = DeletePolicy::Never;
        }

        if !self.extra.is_empty() {
            debug!(
                options = ?self.extra.keys().collect::<Vec<_>>(),
                "ignoring unknown configuration options"
            );
        }
    }

    /// The backup directory path under `dest_dir`.
    pub fn backup_dir(&self) -> PathBuf {
        self.dest_dir
            .join(format!("{}_backup", self.application_name))
    }

    /// Resolve an engine artifact path: relative paths live under
    /// `dest_dir`, absolute paths are used as-is.
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dest_dir.join(path)
        }
    }
}

/// Lowercase each extension and ensure a leading dot; empty entries are
/// dropped.
pub fn normalize_extensions(exts: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(exts.len());
    for ext in exts {
        let trimmed = ext.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('.') {
            out.push(trimmed);
        } else {
            out.push(format!(".{}", trimmed));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = OtaConfig::default();
        assert_eq!(cfg.ota_state_file, PathBuf::from("ota_state.txt"));
        assert_eq!(cfg.local_manifest_file, PathBuf::from("versions.json"));
        assert_eq!(cfg.application_name, "rova");
        assert_eq!(cfg.download_retries, 1);
        assert_eq!(cfg.io_chunk_size, 512);
        assert!(cfg.strict_http_fs);
        assert_eq!(cfg.delete_files_not_in_manifest_policy, DeletePolicy::Never);
        assert!(cfg
            .backup_skip_extensions
            .iter()
            .any(|e| e == ".rgb565"));
    }

    #[test]
    fn test_unknown_options_are_collected_not_rejected() {
        let cfg: OtaConfig = serde_json::from_str(
            r#"{"manifest_url": "http://host/ota/versions.json", "future_option": 42}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.manifest_url.as_deref(),
            Some("http://host/ota/versions.json")
        );
        assert!(cfg.extra.contains_key("future_option"));
    }

    #[test]
    fn test_extension_normalization() {
        let norm = normalize_extensions(&["PY".into(), ".Mpy".into(), "  ".into()]);
        assert_eq!(norm, vec![".py".to_string(), ".mpy".to_string()]);
    }

    #[test]
    fn test_extension_policy_without_allowlist_degrades() {
        let mut cfg = OtaConfig {
            delete_files_not_in_manifest_policy: DeletePolicy::CustomExtensions,
            ..Default::default()
        };
        cfg.normalize();
        assert_eq!(cfg.delete_files_not_in_manifest_policy, DeletePolicy::Never);
    }

    #[test]
    fn test_zero_chunk_sizes_fall_back() {
        let mut cfg = OtaConfig {
            io_chunk_size: 0,
            md5_chunk_size: 0,
            ..Default::default()
        };
        cfg.normalize();
        assert_eq!(cfg.io_chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.md5_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_backup_dir_derives_from_application_name() {
        let cfg = OtaConfig {
            dest_dir: PathBuf::from("/srv/app"),
            application_name: "meterd".into(),
            ..Default::default()
        };
        assert_eq!(cfg.backup_dir(), PathBuf::from("/srv/app/meterd_backup"));
    }

    #[test]
    fn test_relative_artifacts_resolve_under_dest_dir() {
        let cfg = OtaConfig {
            dest_dir: PathBuf::from("/srv/app"),
            ..Default::default()
        };
        assert_eq!(
            cfg.resolve(&cfg.ota_state_file),
            PathBuf::from("/srv/app/ota_state.txt")
        );
        assert_eq!(cfg.resolve(std::path::Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }
}
