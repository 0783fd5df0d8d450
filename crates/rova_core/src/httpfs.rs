//! HTTP-FS mode: recursive crawl of an HTTP directory listing.
//!
//! Used when no manifest is published. The crawler walks `href` links in
//! Nginx-style listing pages, recursing into entries with a trailing
//! slash and downloading plain file names. There is no per-file hash and
//! no signature in this mode.

use crate::backup::BackupManager;
use crate::download::Downloader;
use crate::error::OtaError;
use crate::events::{ProgressEvent, ProgressSink, UpdateMode};
use crate::fetch::Fetcher;
use crate::manifest;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One HTTP-FS crawl pass over a listing tree.
pub struct HttpFsSession<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub progress: &'a dyn ProgressSink,
    pub backup: &'a BackupManager,
    pub dest_dir: &'a Path,
    pub downloader: Downloader<'a>,
    pub strict: bool,
    pub io_chunk_size: usize,
}

impl<'a> HttpFsSession<'a> {
    /// Crawl `base_url` and download every file found, mirroring the
    /// listing layout under `dest_dir`. Paths of files that did not exist
    /// before are appended to `created`. Returns the number of files
    /// downloaded.
    pub fn run(&self, base_url: &str, created: &mut Vec<PathBuf>) -> Result<usize, OtaError> {
        info!(url = base_url, "starting recursive http-fs update");
        let link_re = Regex::new(r#"href="([^"]+)""#).expect("static regex");
        let mut visited = BTreeSet::new();
        let mut downloaded = 0;
        self.crawl(base_url, "", &link_re, &mut visited, created, &mut downloaded)?;
        Ok(downloaded)
    }

    fn crawl(
        &self,
        url: &str,
        rel_base: &str,
        link_re: &Regex,
        visited: &mut BTreeSet<String>,
        created: &mut Vec<PathBuf>,
        downloaded: &mut usize,
    ) -> Result<(), OtaError> {
        if !visited.insert(url.trim_end_matches('/').to_string()) {
            warn!(url, "skipping already-visited listing");
            return Ok(());
        }

        let body = match self.fetch_listing(url) {
            Some(body) => body,
            None => return Ok(()),
        };

        for capture in link_re.captures_iter(&body) {
            let entry = &capture[1];
            // Parent links, query strings, fragments and non-relative
            // targets are not tree entries.
            if entry.starts_with("../")
                || entry.starts_with('/')
                || entry.contains('?')
                || entry.contains('#')
                || entry.contains("://")
            {
                continue;
            }

            if let Some(dir_name) = entry.strip_suffix('/') {
                if dir_name.is_empty()
                    || dir_name == "."
                    || dir_name == ".."
                    || dir_name.contains('/')
                {
                    continue;
                }
                let sub_url = format!("{}/{}", url.trim_end_matches('/'), entry);
                let sub_base = format!("{}{}", rel_base, entry);
                self.crawl(&sub_url, &sub_base, link_re, visited, created, downloaded)?;
            } else if !entry.contains('/') {
                let rel_path = format!("{}{}", rel_base, entry);
                if !manifest::is_safe_relative_path(&rel_path) {
                    warn!(path = %rel_path, "ignoring unsafe listing entry");
                    continue;
                }
                self.download_one(url, &rel_path, entry, created)?;
                *downloaded += 1;
            }
        }
        Ok(())
    }

    fn download_one(
        &self,
        listing_url: &str,
        rel_path: &str,
        entry: &str,
        created: &mut Vec<PathBuf>,
    ) -> Result<(), OtaError> {
        let file_url = format!("{}/{}", listing_url.trim_end_matches('/'), entry);
        self.progress.emit(&ProgressEvent::FileUpdateStart {
            path: rel_path.to_string(),
            mode: UpdateMode::HttpFs,
            index: None,
            total: None,
            from: None,
            to: None,
        });

        let dest = self.dest_dir.join(rel_path);
        if !dest.exists() {
            created.push(dest.clone());
        }
        let result = self
            .backup
            .backup_if_needed(rel_path)
            .map_err(OtaError::from)
            .and_then(|_| self.downloader.download(&file_url, &dest, None));

        match result {
            Ok(()) => {
                self.progress.emit(&ProgressEvent::FileUpdateDone {
                    path: rel_path.to_string(),
                    mode: UpdateMode::HttpFs,
                    index: None,
                    total: None,
                });
                Ok(())
            }
            Err(e) => {
                warn!(path = %rel_path, error = %e, "http-fs file download failed");
                self.progress.emit(&ProgressEvent::FileUpdateFailed {
                    path: rel_path.to_string(),
                    mode: UpdateMode::HttpFs,
                    error: e.to_string(),
                });
                if self.strict {
                    Err(OtaError::HttpFs(format!("{}: {}", rel_path, e)))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Fetch a listing page. Failures are logged and read as an empty
    /// listing; only file downloads participate in strict-mode aborts.
    fn fetch_listing(&self, url: &str) -> Option<String> {
        let response = match self.fetcher.get(url, None) {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "failed to list directory");
                return None;
            }
        };
        if response.status != 200 {
            warn!(url, status = response.status, "failed to list directory");
            return None;
        }
        let mut body = Vec::new();
        let mut reader = response.body;
        let mut buf = vec![0u8; self.io_chunk_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&buf[..n]),
                Err(e) => {
                    warn!(url, error = %e, "failed reading directory listing");
                    return None;
                }
            }
        }
        Some(String::from_utf8_lossy(&body).into_owned())
    }
}
