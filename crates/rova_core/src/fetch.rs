//! Byte-stream transport consumed by the engine.
//!
//! The engine never talks HTTP directly; it consumes a [`Fetcher`] that
//! yields a status code and a readable body. The production implementation
//! wraps a blocking reqwest client. Tests substitute an in-memory fetcher.

use std::io::{self, Read};
use std::time::Duration;

/// A fetched response: transport-level status plus a streaming body.
pub struct FetchResponse {
    pub status: u16,
    pub body: Box<dyn Read>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Byte-stream fetcher with optional range support.
///
/// `range_start` asks the server to resume at the given byte offset
/// (`Range: bytes=N-`); implementations that cannot honor it return a
/// plain 200 response and the caller restarts the transfer.
pub trait Fetcher {
    fn get(&self, url: &str, range_start: Option<u64>) -> io::Result<FetchResponse>;
}

/// Production fetcher over a blocking HTTP client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// Build a fetcher with an optional per-request timeout in seconds;
    /// `None` disables the timeout entirely.
    pub fn new(timeout_s: Option<u64>) -> io::Result<Self> {
        let timeout = timeout_s.map(Duration::from_secs);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str, range_start: Option<u64>) -> io::Result<FetchResponse> {
        let mut request = self.client.get(url);
        if let Some(offset) = range_start {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }
        let response = request
            .send()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(FetchResponse {
            status: response.status().as_u16(),
            body: Box::new(response),
        })
    }
}
