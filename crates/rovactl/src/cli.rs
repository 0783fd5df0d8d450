//! CLI - command-line argument parsing
//!
//! Defines the rovactl surface with clap. Parsing stays separate from
//! execution logic in builder.rs and server.rs.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Host-side tooling for rova OTA updates.
#[derive(Parser)]
#[command(name = "rovactl")]
#[command(about = "Build OTA manifests and serve them to devices", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a source tree and write the OTA manifest
    Build {
        #[command(flatten)]
        opts: BuildOpts,

        /// Output manifest path
        #[arg(long, default_value = "versions.json")]
        out: PathBuf,
    },

    /// Serve the manifest and files over HTTP for development
    Serve {
        #[command(flatten)]
        opts: BuildOpts,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

/// Options shared by `build` and `serve` (the dev server regenerates the
/// manifest from the same scan configuration on every request).
#[derive(Args, Clone)]
pub struct BuildOpts {
    /// Source directory to scan
    #[arg(long)]
    pub src: PathBuf,

    /// Only include files with these extensions (default: all files)
    #[arg(long = "include-ext")]
    pub include_ext: Vec<String>,

    /// Skip files whose name starts with one of these prefixes
    #[arg(long = "exclude-prefix", default_values_t = vec!["test_".to_string()])]
    pub exclude_prefix: Vec<String>,

    /// Skip directories with these names anywhere in the tree
    #[arg(
        long = "exclude-dir",
        default_values_t = ["__pycache__", ".git", "target", "docs", "tests"].map(String::from)
    )]
    pub exclude_dir: Vec<String>,

    /// Where per-file version strings come from
    #[arg(long, value_enum, default_value_t = VersionSource::Mtime)]
    pub version_source: VersionSource,

    /// Keep the previous per-file version when the MD5 is unchanged
    #[arg(long)]
    pub reuse_unchanged: bool,

    /// Previous manifest to take versions from (defaults to the output path)
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Manifest-level version (default: highest per-file version)
    #[arg(long)]
    pub manifest_version: Option<String>,

    /// Shared secret for HMAC-SHA256 manifest signing
    #[arg(long)]
    pub auth_key: Option<String>,

    /// Manifest field to store the signature in
    #[arg(long, default_value = "signature")]
    pub signature_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VersionSource {
    /// File modification time, epoch seconds
    Mtime,
    /// Last git commit time of the file, falling back to mtime
    GitCommitTime,
}
