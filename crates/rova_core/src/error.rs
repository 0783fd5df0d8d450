//! Error taxonomy for the update engine.
//!
//! Every failure surfaced by the engine carries one of the stable wire
//! codes in [`ErrorCode`]; the human-readable detail string is advisory
//! and callers must branch on the code only.

use std::io;
use thiserror::Error;

/// Stable error codes surfaced via `last_error_code` and in
/// `file_update_failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ManifestFetchFailed,
    ManifestSignatureInvalid,
    DownloadFailed,
    Md5Mismatch,
    ApplyFailed,
    HttpFsFailed,
    DeleteExtraneousFailed,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ManifestFetchFailed => "manifest_fetch_failed",
            ErrorCode::ManifestSignatureInvalid => "manifest_signature_invalid",
            ErrorCode::DownloadFailed => "download_failed",
            ErrorCode::Md5Mismatch => "md5_mismatch",
            ErrorCode::ApplyFailed => "apply_failed",
            ErrorCode::HttpFsFailed => "http_fs_failed",
            ErrorCode::DeleteExtraneousFailed => "delete_extraneous_failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the update engine.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),

    #[error("manifest signature invalid: {0}")]
    ManifestSignature(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("md5 mismatch for {path}: expected {expected}, got {actual}")]
    Md5Mismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("apply failed: {0}")]
    Apply(String),

    #[error("http-fs update failed: {0}")]
    HttpFs(String),

    #[error("failed to delete extraneous file: {0}")]
    DeleteExtraneous(String),

    /// Filesystem errors during an apply surface as `apply_failed`.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl OtaError {
    /// The wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            OtaError::ManifestFetch(_) => ErrorCode::ManifestFetchFailed,
            OtaError::ManifestSignature(_) => ErrorCode::ManifestSignatureInvalid,
            OtaError::Download(_) => ErrorCode::DownloadFailed,
            OtaError::Md5Mismatch { .. } => ErrorCode::Md5Mismatch,
            OtaError::Apply(_) => ErrorCode::ApplyFailed,
            OtaError::HttpFs(_) => ErrorCode::HttpFsFailed,
            OtaError::DeleteExtraneous(_) => ErrorCode::DeleteExtraneousFailed,
            OtaError::Io(_) => ErrorCode::ApplyFailed,
        }
    }
}
