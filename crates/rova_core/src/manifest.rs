//! Manifest wire format and the local manifest store.
//!
//! A manifest maps relative POSIX paths to per-file version strings and
//! optional MD5 digests. Parsing is strict about paths (nothing may
//! escape the destination root) and digest format, and tolerant about
//! unknown fields so newer hosts can extend the document.

use crate::error::OtaError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One file tracked by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative POSIX path under the destination root.
    #[serde(default)]
    pub path: String,

    /// Opaque per-file version string.
    #[serde(default, deserialize_with = "de_version")]
    pub version: String,

    /// Lowercase 32-hex MD5 of the file content; absent disables per-file
    /// hash validation for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

/// A parsed manifest. Immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Opaque manifest-level version string; empty when no local manifest
    /// exists yet.
    #[serde(default, deserialize_with = "de_version")]
    pub version: String,

    /// Mapping of relative path to entry. `BTreeMap` keeps serialization
    /// and iteration in ascending key order, which is also the plan order.
    #[serde(default)]
    pub files: BTreeMap<String, ManifestEntry>,
}

/// Accept both string and integer version fields; older hosts emitted
/// integers.
fn de_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "version must be a string, got {}",
            other
        ))),
    }
}

impl Manifest {
    /// Parse raw manifest bytes into a JSON value.
    pub fn parse_value(bytes: &[u8]) -> Result<serde_json::Value, OtaError> {
        serde_json::from_slice(bytes)
            .map_err(|e| OtaError::ManifestFetch(format!("manifest parse error: {}", e)))
    }

    /// Build a validated manifest from a parsed value. Unknown top-level
    /// and per-entry fields (including the signature) are ignored.
    pub fn from_value(value: &serde_json::Value) -> Result<Manifest, OtaError> {
        let mut manifest: Manifest = serde_json::from_value(value.clone())
            .map_err(|e| OtaError::ManifestFetch(format!("manifest parse error: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&mut self) -> Result<(), OtaError> {
        for (key, entry) in self.files.iter_mut() {
            if !is_safe_relative_path(key) {
                return Err(OtaError::ManifestFetch(format!(
                    "manifest path escapes destination root: {:?}",
                    key
                )));
            }
            if entry.path.is_empty() {
                entry.path = key.clone();
            } else if entry.path != *key {
                return Err(OtaError::ManifestFetch(format!(
                    "manifest entry path {:?} does not match its key {:?}",
                    entry.path, key
                )));
            }
            if let Some(md5) = entry.md5.take() {
                let md5 = md5.to_ascii_lowercase();
                if md5.is_empty() {
                    warn!(path = %key, "manifest entry has empty md5, hash validation disabled");
                } else if md5.len() != 32 || !md5.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(OtaError::ManifestFetch(format!(
                        "malformed md5 for {:?}: {:?}",
                        key, md5
                    )));
                } else {
                    entry.md5 = Some(md5);
                }
            }
        }
        Ok(())
    }
}

/// Reject absolute paths and any path with `.`/`..` components, empty
/// components or backslashes.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    path.split('/')
        .all(|c| !c.is_empty() && c != "." && c != "..")
}

/// Canonical bytes for signing: the manifest value with the signature
/// field removed, serialized compactly. Object keys come out in ascending
/// UTF-8 order, so host and device agree bytewise.
pub fn canonical_bytes(
    value: &serde_json::Value,
    signature_field: &str,
) -> Result<Vec<u8>, OtaError> {
    let mut stripped = value.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove(signature_field);
    }
    serde_json::to_vec(&stripped)
        .map_err(|e| OtaError::ManifestFetch(format!("manifest serialization error: {}", e)))
}

/// The signature hex carried by a manifest value, if any.
pub fn extract_signature<'a>(
    value: &'a serde_json::Value,
    signature_field: &str,
) -> Option<&'a str> {
    value.get(signature_field).and_then(|v| v.as_str())
}

/// Persists the last successfully applied manifest.
///
/// The raw remote bytes are stored verbatim so the local file stays
/// byte-identical to the remote document, signature included.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the local manifest. A missing file or a parse error yields an
    /// empty manifest (version = empty string).
    pub fn load(&self) -> Manifest {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to read local manifest");
                }
                return Manifest::default();
            }
        };
        match Manifest::parse_value(&bytes).and_then(|v| Manifest::from_value(&v)) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "invalid local manifest, treating as empty");
                Manifest::default()
            }
        }
    }

    /// Atomically persist the raw manifest bytes (write-to-temp + rename).
    pub fn save_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        crate::fsutil::ensure_parent_dir(&self.path)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
