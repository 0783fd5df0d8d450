//! rovactl - host-side tooling for rova OTA updates
//!
//! Two commands:
//! - `rovactl build --src <dir>` scans a source tree and writes the
//!   manifest devices consume.
//! - `rovactl serve --src <dir>` runs a dev-only HTTP server exposing
//!   the manifest and files.

mod builder;
mod cli;
mod server;

use anyhow::Result;
use builder::ManifestBuilder;
use clap::Parser;
use cli::{Cli, Commands};
use server::DevServer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rovactl=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { opts, out } => {
            let builder = ManifestBuilder::from_opts(&opts, Some(&out));
            builder.write_manifest(&out)
        }
        Commands::Serve { opts, host, port } => {
            let builder = ManifestBuilder::from_opts(&opts, None);
            let server = DevServer::new(opts.src.clone(), builder)?;
            server.run(&format!("{}:{}", host, port))
        }
    }
}
