//! Chunked downloads with bounded retry, backoff and range resume.

use crate::error::OtaError;
use crate::events::{ProgressEvent, ProgressSink};
use crate::fetch::Fetcher;
use crate::fsutil;
use crate::verify;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Performs one file transfer at a time on behalf of the orchestrator.
///
/// Every attempt streams in `io_chunk_size` reads. With resume enabled
/// the transfer goes through a `.part` sibling that is renamed into place
/// on completion; an interrupted `.part` is continued with a `Range`
/// request on the next attempt.
pub struct Downloader<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub progress: &'a dyn ProgressSink,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub io_chunk_size: usize,
    pub md5_chunk_size: usize,
    pub resume: bool,
}

impl<'a> Downloader<'a> {
    /// Download `url` to `dest`, verifying against `expected_md5` when
    /// given. Retries transport and verification failures with exponential
    /// backoff until the attempt budget is exhausted.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), OtaError> {
        let attempts = self.retries + 1;
        let dest_str = dest.display().to_string();
        let mut last_error = None;

        for attempt in 0..attempts {
            self.progress.emit(&ProgressEvent::DownloadAttempt {
                url: url.to_string(),
                path: dest_str.clone(),
                attempt: attempt + 1,
                attempts,
            });

            match self.try_once(url, dest, expected_md5) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt + 1 < attempts {
                        let wait_ms = self
                            .retry_base_delay_ms
                            .saturating_mul(1u64 << attempt.min(20));
                        warn!(
                            url,
                            attempt = attempt + 1,
                            wait_ms,
                            error = %e,
                            "download attempt failed, retrying"
                        );
                        self.progress.emit(&ProgressEvent::DownloadRetry {
                            url: url.to_string(),
                            path: dest_str.clone(),
                            attempt: attempt + 1,
                            wait_ms,
                        });
                        thread::sleep(Duration::from_millis(wait_ms));
                    }
                    last_error = Some(e);
                }
            }
        }

        // A hash mismatch keeps its own code; everything else is a
        // transport-level download failure.
        match last_error {
            Some(e @ OtaError::Md5Mismatch { .. }) => Err(e),
            Some(e) => Err(OtaError::Download(format!("{}: {}", url, e))),
            None => Err(OtaError::Download(format!("{}: no attempts made", url))),
        }
    }

    fn try_once(&self, url: &str, dest: &Path, expected_md5: Option<&str>) -> Result<(), OtaError> {
        let part = if self.resume {
            part_path(dest)
        } else {
            dest.to_path_buf()
        };

        let mut existing = 0u64;
        if self.resume {
            if let Ok(meta) = fs::metadata(&part) {
                if meta.is_file() {
                    existing = meta.len();
                }
            }
        }
        let range_start = if existing > 0 { Some(existing) } else { None };

        let response = self
            .fetcher
            .get(url, range_start)
            .map_err(|e| OtaError::Download(format!("{}: {}", url, e)))?;

        let append = match (response.status, range_start) {
            (206, Some(offset)) => {
                debug!(url, offset, "resuming partial download");
                true
            }
            (status, _) if (200..300).contains(&status) => false,
            (status, _) => {
                return Err(OtaError::Download(format!(
                    "HTTP {} while downloading {}",
                    status, url
                )));
            }
        };

        fsutil::ensure_parent_dir(&part)?;
        let mut file = if append {
            OpenOptions::new().append(true).open(&part)?
        } else {
            File::create(&part)?
        };

        let mut body = response.body;
        let mut buf = vec![0u8; self.io_chunk_size.max(1)];
        loop {
            let n = body.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
        }
        file.flush()?;
        drop(file);

        if self.resume {
            if dest.exists() {
                fs::remove_file(dest)?;
            }
            fs::rename(&part, dest)?;
        }

        if let Some(expected) = expected_md5 {
            let actual = verify::file_md5(dest, self.md5_chunk_size)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(OtaError::Md5Mismatch {
                    path: dest.display().to_string(),
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// The `.part` sibling used for resumable transfers.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
