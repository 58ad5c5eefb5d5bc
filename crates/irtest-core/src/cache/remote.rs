//! Remote transport boundary for the caches.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;

use super::CacheError;

/// Result of a body download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The body was written to the destination.
    Fetched,
    /// The remote reported the resource does not exist.
    NotFound,
}

/// Source of remote files for the caches.
///
/// Implementations must be shareable across worker threads. "Not found" is a
/// normal outcome, distinct from transport failures.
pub trait RemoteFetcher: Send + Sync {
    /// Downloads `url` into `dest`, replacing any existing content.
    fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchOutcome, CacheError>;

    /// Downloads `url` as text, or `None` when it does not exist.
    fn fetch_text(&self, url: &str) -> Result<Option<String>, CacheError>;
}

/// Connect timeout for repository requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout; installers and server jars can be large.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// [`RemoteFetcher`] backed by a blocking HTTP client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client with the harness user agent and bounded timeouts.
    pub fn new() -> Result<Self, CacheError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("irtest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<Option<reqwest::blocking::Response>, CacheError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| CacheError::transport(url, &e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(Some(response))
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchOutcome, CacheError> {
        let Some(mut response) = self.get(url)? else {
            return Ok(FetchOutcome::NotFound);
        };
        let mut file = File::create(dest).map_err(|e| CacheError::io(dest, &e))?;
        response
            .copy_to(&mut file)
            .map_err(|e| CacheError::transport(url, &e))?;
        Ok(FetchOutcome::Fetched)
    }

    fn fetch_text(&self, url: &str) -> Result<Option<String>, CacheError> {
        let Some(response) = self.get(url)? else {
            return Ok(None);
        };
        response
            .text()
            .map(Some)
            .map_err(|e| CacheError::transport(url, &e))
    }
}
