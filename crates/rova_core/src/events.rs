//! Progress events published by the update engine.
//!
//! The orchestrator reports everything it does through a [`ProgressSink`].
//! Events are plain value types; sinks must not block for long and must
//! not panic into the engine.

use crate::config::DeletePolicy;
use serde::Serialize;

/// Which pipeline produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    Manifest,
    HttpFs,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Manifest => "manifest",
            UpdateMode::HttpFs => "http_fs",
        }
    }
}

/// One progress event with its payload.
///
/// Manifest-mode file events carry `index`/`total`/`from`/`to`; HTTP-FS
/// file events carry only `path` and `mode`. Absent fields are skipped
/// when the event is serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    UpdateStart {
        mode: UpdateMode,
    },
    UpdateApplied {
        mode: UpdateMode,
    },
    FileUpdateStart {
        path: String,
        mode: UpdateMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    FileUpdateDone {
        path: String,
        mode: UpdateMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    FileUpdateSkip {
        path: String,
        index: usize,
        total: usize,
    },
    FileUpdateFailed {
        path: String,
        mode: UpdateMode,
        error: String,
    },
    DownloadAttempt {
        url: String,
        path: String,
        attempt: u32,
        attempts: u32,
    },
    DownloadRetry {
        url: String,
        path: String,
        attempt: u32,
        wait_ms: u64,
    },
    FileDeleteExtra {
        path: String,
        policy: DeletePolicy,
    },
}

impl ProgressEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::UpdateStart { .. } => "update_start",
            ProgressEvent::UpdateApplied { .. } => "update_applied",
            ProgressEvent::FileUpdateStart { .. } => "file_update_start",
            ProgressEvent::FileUpdateDone { .. } => "file_update_done",
            ProgressEvent::FileUpdateSkip { .. } => "file_update_skip",
            ProgressEvent::FileUpdateFailed { .. } => "file_update_failed",
            ProgressEvent::DownloadAttempt { .. } => "download_attempt",
            ProgressEvent::DownloadRetry { .. } => "download_retry",
            ProgressEvent::FileDeleteExtra { .. } => "file_delete_extra",
        }
    }
}

/// Receives progress events from the engine.
///
/// The default implementation drops every event, so a unit struct can opt
/// in with an empty `impl`.
pub trait ProgressSink {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Sink that logs each event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: &ProgressEvent) {
        tracing::debug!(event = event.name(), ?event, "ota progress");
    }
}
