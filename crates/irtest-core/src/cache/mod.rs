//! Local mirrors of remote repositories.
//!
//! Two caches sit in front of the network:
//!
//! - [`MavenCache`] mirrors a Maven-layout repository (installers, libraries,
//!   `maven-metadata.xml`).
//! - [`MinecraftCache`] mirrors the game's launcher manifest, per-version
//!   descriptors and distribution jars.
//!
//! Both trust a cached file for a freshness window (measured from its
//! modification time). Past the window they consult a published digest before
//! reusing the file, and every download is staged next to its target and
//! renamed into place so readers never observe a partial file. Concurrent
//! requests for the same local path are serialized.

mod maven;
mod minecraft;
mod remote;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use thiserror::Error;

pub use maven::{CacheTtl, MavenCache, parse_metadata_versions};
pub use minecraft::{LauncherManifest, ManifestVersion, MinecraftCache};
pub use remote::{FetchOutcome, HttpFetcher, RemoteFetcher};

use crate::hash::{HashAlgorithm, parse_side_channel};

/// Errors raised by the caches and their transport.
///
/// Cloneable so memoized lookups can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Local filesystem failure.
    #[error("I/O error on {}: {reason}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },

    /// The request could not be completed.
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying error.
        reason: String,
    },

    /// The remote answered with an unexpected status.
    #[error("request to {url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A freshly downloaded file still disagrees with its published digest.
    #[error("{url} does not match its published {algorithm} digest (expected {expected}, got {actual})")]
    HashMismatch {
        /// Source URL.
        url: String,
        /// Digest algorithm name.
        algorithm: &'static str,
        /// Published digest.
        expected: String,
        /// Digest of the downloaded file.
        actual: String,
    },

    /// The coordinate cannot be mapped to a file without a version.
    #[error("coordinate {coordinate} has no version")]
    Unversioned {
        /// The offending coordinate.
        coordinate: String,
    },

    /// A cached document could not be parsed.
    #[error("malformed {what} at {}: {reason}", path.display())]
    Malformed {
        /// Kind of document.
        what: &'static str,
        /// Local path of the document.
        path: PathBuf,
        /// Parser error.
        reason: String,
    },

    /// A required remote resource does not exist.
    #[error("{what} not found: {key}")]
    Missing {
        /// Kind of resource.
        what: &'static str,
        /// Identifier that was looked up.
        key: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: &Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn transport(url: &str, err: &dyn std::fmt::Display) -> Self {
        Self::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// A digest published next to a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublishedDigest {
    pub(crate) algorithm: HashAlgorithm,
    pub(crate) digest: String,
}

impl PublishedDigest {
    /// Hashes `path` and reports whether it matches, returning the actual digest.
    fn check(&self, path: &Path) -> Result<(bool, String), CacheError> {
        let actual = self
            .algorithm
            .hash_file(path)
            .map_err(|e| CacheError::io(path, &e))?;
        Ok((actual.eq_ignore_ascii_case(&self.digest), actual))
    }
}

/// Looks up the first published digest for `url`, trying each side channel.
pub(crate) fn published_digest(
    fetcher: &dyn RemoteFetcher,
    url: &str,
) -> Result<Option<PublishedDigest>, CacheError> {
    for algorithm in HashAlgorithm::SIDE_CHANNELS {
        let side_channel = format!("{url}.{}", algorithm.extension());
        if let Some(digest) = fetcher
            .fetch_text(&side_channel)?
            .as_deref()
            .and_then(parse_side_channel)
        {
            return Ok(Some(PublishedDigest { algorithm, digest }));
        }
    }
    Ok(None)
}

/// Whether `path` was modified within `ttl`.
pub(crate) fn is_fresh(path: &Path, ttl: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .is_ok_and(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .map_or(true, |age| age <= ttl)
        })
}

/// Resets the modification time of `path`, extending its freshness window.
pub(crate) fn touch(path: &Path) -> Result<(), CacheError> {
    File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()))
        .map_err(|e| CacheError::io(path, &e))
}

/// Downloads `url` to a staging file beside `target`, then renames it into
/// place. Returns `false` when the remote reports not-found.
pub(crate) fn fetch_atomic(
    fetcher: &dyn RemoteFetcher,
    url: &str,
    target: &Path,
) -> Result<bool, CacheError> {
    let parent = target
        .parent()
        .ok_or_else(|| CacheError::io(target, &io::Error::other("path has no parent")))?;
    fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, &e))?;

    let staging = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempfile_in(parent)
        .map_err(|e| CacheError::io(parent, &e))?;

    match fetcher.fetch_to(url, staging.path())? {
        FetchOutcome::NotFound => Ok(false),
        FetchOutcome::Fetched => {
            staging
                .persist(target)
                .map_err(|e| CacheError::io(target, &e.error))?;
            tracing::debug!(url, path = %target.display(), "downloaded");
            Ok(true)
        },
    }
}

/// Reads and parses a cached JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(
    path: &Path,
    what: &'static str,
) -> Result<T, CacheError> {
    let bytes = fs::read(path).map_err(|e| CacheError::io(path, &e))?;
    serde_json::from_slice(&bytes).map_err(|e| CacheError::Malformed {
        what,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
