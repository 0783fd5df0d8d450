//! rova_core - Crash-safe OTA updates for file-based device trees
//!
//! A device periodically diffs its installed files against a remote
//! manifest, downloads what changed in small chunks, verifies integrity,
//! and commits or reverts atomically. Durable state is three filesystem
//! artifacts: a one-token state marker, the local manifest, and a backup
//! directory mirroring everything the in-flight apply touched. Power can
//! be lost at any instant; the next boot either rolls back (`installing`)
//! or waits for the application to confirm (`confirm_pending`).
//!
//! The engine is single-threaded and synchronous. HTTP transport, the
//! reboot primitive and progress reporting are injected at the seams
//! (`Fetcher`, `RebootHook`, `ProgressSink`).
//!
//! ```no_run
//! use rova_core::{OtaConfig, OtaUpdater};
//!
//! let cfg = OtaConfig {
//!     manifest_url: Some("http://example.com/ota/versions.json".into()),
//!     base_file_url: "http://example.com/ota".into(),
//!     dest_dir: "/srv/app".into(),
//!     ..Default::default()
//! };
//! let mut updater = OtaUpdater::new(cfg)?;
//! updater.check_and_perform_ota()?;
//! # Ok::<(), rova_core::OtaError>(())
//! ```

pub mod backup;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod fetch;
pub mod fsutil;
pub mod httpfs;
pub mod manifest;
pub mod plan;
pub mod policy;
pub mod state;
pub mod updater;
pub mod verify;

pub use config::{DeletePolicy, OtaConfig};
pub use error::{ErrorCode, OtaError};
pub use events::{NullProgress, ProgressEvent, ProgressSink, UpdateMode};
pub use fetch::{FetchResponse, Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestEntry, ManifestStore};
pub use state::{OtaState, StateStore};
pub use updater::{NoopReboot, OtaUpdater, RebootHook, UpdateOutcome};
