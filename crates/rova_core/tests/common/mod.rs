//! Shared fixtures for the end-to-end update scenarios: an in-memory
//! fetcher, a recording progress sink and a counting reboot hook.
#![allow(dead_code)]

use md5::{Digest, Md5};
use rova_core::{FetchResponse, Fetcher, ProgressEvent, ProgressSink, RebootHook};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a route serves.
#[derive(Clone)]
pub enum Served {
    /// 200 with this body (206 slice when a range is requested).
    Body(Vec<u8>),
    /// A bare status with an empty body.
    Status(u16),
    /// A transport-level error.
    Error,
}

/// In-memory fetcher with range support. Unknown URLs answer 404.
/// Clones share routes and the request log.
#[derive(Default, Clone)]
pub struct FakeFetcher {
    routes: Arc<Mutex<HashMap<String, Served>>>,
    requests: Arc<Mutex<Vec<(String, Option<u64>)>>>,
}

impl FakeFetcher {
    pub fn serve(&self, url: &str, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Served::Body(body.to_vec()));
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Served::Status(status));
    }

    pub fn serve_error(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Served::Error);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for FakeFetcher {
    fn get(&self, url: &str, range_start: Option<u64>) -> io::Result<FetchResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), range_start));

        let served = self.routes.lock().unwrap().get(url).cloned();
        match served {
            None => Ok(FetchResponse {
                status: 404,
                body: Box::new(io::empty()),
            }),
            Some(Served::Status(status)) => Ok(FetchResponse {
                status,
                body: Box::new(io::empty()),
            }),
            Some(Served::Error) => Err(io::Error::new(io::ErrorKind::Other, "connection refused")),
            Some(Served::Body(body)) => match range_start {
                Some(offset) if (offset as usize) < body.len() => Ok(FetchResponse {
                    status: 206,
                    body: Box::new(io::Cursor::new(body[offset as usize..].to_vec())),
                }),
                _ => Ok(FetchResponse {
                    status: 200,
                    body: Box::new(io::Cursor::new(body)),
                }),
            },
        }
    }
}

/// Sink that keeps every event for later assertions. Clones share the
/// same buffer, so one copy can live inside the updater while the test
/// keeps another.
#[derive(Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Reboot hook that counts invocations instead of resetting anything.
#[derive(Default, Clone)]
pub struct CountingReboot(pub Arc<AtomicUsize>);

impl CountingReboot {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl RebootHook for CountingReboot {
    fn reboot(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
