//! Dev server - serves the manifest and source files over HTTP.
//!
//! Development and testing only; nothing here is hardened for
//! production. The manifest is regenerated from the source tree on every
//! request so live edits are picked up immediately.

use crate::builder::ManifestBuilder;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};

/// Route prefix devices fetch from.
const OTA_PREFIX: &str = "/ota/";

pub struct DevServer {
    src_dir: PathBuf,
    builder: ManifestBuilder,
}

enum Reply {
    Ok { content_type: &'static str, body: Vec<u8> },
    NotFound,
}

impl DevServer {
    pub fn new(src_dir: PathBuf, builder: ManifestBuilder) -> Result<Self> {
        let src_dir = src_dir
            .canonicalize()
            .with_context(|| format!("source directory {} not found", src_dir.display()))?;
        Ok(Self { src_dir, builder })
    }

    /// Serve forever on `addr` (e.g. `127.0.0.1:8000`).
    pub fn run(&self, addr: &str) -> Result<()> {
        let server =
            Server::http(addr).map_err(|e| anyhow!("failed to bind {}: {}", addr, e))?;
        info!("dev OTA server listening on http://{}", addr);
        info!("manifest URL: http://{}{}versions.json", addr, OTA_PREFIX);

        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let reply = if request.method() == &tiny_http::Method::Get {
                self.handle(&url)
            } else {
                Reply::NotFound
            };

            let result = match reply {
                Reply::Ok { content_type, body } => {
                    info!(url = %url, bytes = body.len(), "serving");
                    request.respond(
                        Response::from_data(body)
                            .with_header(header("Content-Type", content_type))
                            .with_header(header("Cache-Control", "no-store")),
                    )
                }
                Reply::NotFound => {
                    warn!(url = %url, "not found");
                    request.respond(Response::from_string("not found").with_status_code(404))
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to send response");
            }
        }
        Ok(())
    }

    fn handle(&self, url: &str) -> Reply {
        let Some(rest) = url.strip_prefix(OTA_PREFIX) else {
            return Reply::NotFound;
        };

        if rest == "versions.json" {
            return match self.builder.build() {
                Ok(value) => {
                    let mut body = serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| "{}".to_string());
                    body.push('\n');
                    Reply::Ok {
                        content_type: "application/json",
                        body: body.into_bytes(),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to build manifest");
                    Reply::NotFound
                }
            };
        }

        // Containment: the resolved path must stay under the source root.
        let full = match self.src_dir.join(rest).canonicalize() {
            Ok(p) => p,
            Err(_) => return Reply::NotFound,
        };
        if !full.starts_with(&self.src_dir) || !full.is_file() {
            return Reply::NotFound;
        }

        match fs::read(&full) {
            Ok(body) => Reply::Ok {
                content_type: content_type_for(rest),
                body,
            },
            Err(e) => {
                warn!(path = %full.display(), error = %e, "failed to read file");
                Reply::NotFound
            }
        }
    }
}

fn header(name: &str, value: &str) -> Header {
    format!("{}: {}", name, value)
        .parse::<Header>()
        .expect("static header")
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".json") {
        "application/json"
    } else if path.ends_with(".py") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}
