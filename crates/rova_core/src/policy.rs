//! Delete-extras policy.
//!
//! Decides which local files missing from the remote manifest may be
//! removed. The decision table keys off the configured policy and an
//! optional extension allowlist; extension-scoped policies with an empty
//! allowlist were already degraded to `never` at construction.

use crate::config::DeletePolicy;
use crate::fsutil;
use crate::manifest::Manifest;
use std::collections::BTreeSet;

/// Candidate filter for one apply.
pub struct DeleteExtrasPolicy<'a> {
    policy: DeletePolicy,
    allowlist: &'a [String],
    manifest_extensions: BTreeSet<String>,
}

impl<'a> DeleteExtrasPolicy<'a> {
    pub fn new(policy: DeletePolicy, allowlist: &'a [String], remote: &Manifest) -> Self {
        let manifest_extensions = remote
            .files
            .keys()
            .map(|p| fsutil::path_extension(p))
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            policy,
            allowlist,
            manifest_extensions,
        }
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }

    /// Whether an extraneous file at `rel_path` should be deleted.
    pub fn should_delete(&self, rel_path: &str) -> bool {
        let ext = fsutil::path_extension(rel_path);
        match self.policy {
            DeletePolicy::Never => false,
            DeletePolicy::All => true,
            DeletePolicy::CustomExtensions => {
                !ext.is_empty() && self.allowlist.contains(&ext)
            }
            DeletePolicy::ManifestExtensions => {
                !ext.is_empty()
                    && self.allowlist.contains(&ext)
                    && self.manifest_extensions.contains(&ext)
            }
        }
    }
}
