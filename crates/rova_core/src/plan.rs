//! Diff planning: which files to download, skip or delete.

use crate::manifest::Manifest;

/// One planned step of an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fetch and verify a file.
    Download {
        path: String,
        from: Option<String>,
        to: String,
        md5: Option<String>,
    },
    /// File is already current.
    Skip { path: String, version: String },
    /// Remove a local file absent from the manifest.
    DeleteExtra { path: String },
}

/// Ordered apply plan: downloads and skips in manifest iteration order,
/// then deletions.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    /// Number of `Download` actions.
    pub fn download_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Download { .. }))
            .count()
    }

    /// Number of per-file progress slots (downloads plus skips), used for
    /// `index`/`total` event payloads.
    pub fn file_total(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| !matches!(a, Action::DeleteExtra { .. }))
            .count()
    }
}

/// Diff `remote` against `local`.
///
/// A file is downloaded when it is absent locally or its version string
/// differs; with `force` set every manifest entry is downloaded. The
/// already-filtered `delete_candidates` are appended after all downloads
/// and skips.
pub fn build_plan(
    remote: &Manifest,
    local: &Manifest,
    delete_candidates: Vec<String>,
    force: bool,
) -> Plan {
    let mut actions = Vec::with_capacity(remote.files.len() + delete_candidates.len());

    for (path, entry) in &remote.files {
        let local_entry = local.files.get(path);
        let changed = match local_entry {
            None => true,
            Some(local_entry) => local_entry.version != entry.version,
        };
        if force || changed {
            actions.push(Action::Download {
                path: path.clone(),
                from: local_entry.map(|e| e.version.clone()),
                to: entry.version.clone(),
                md5: entry.md5.clone(),
            });
        } else {
            actions.push(Action::Skip {
                path: path.clone(),
                version: entry.version.clone(),
            });
        }
    }

    for path in delete_candidates {
        actions.push(Action::DeleteExtra { path });
    }

    Plan { actions }
}
