//! Maven-layout repository mirror.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    CacheError, PublishedDigest, RemoteFetcher, fetch_atomic, is_fresh, published_digest, touch,
};
use crate::coordinate::Coordinate;
use crate::sync::KeyedLocks;

const METADATA_FILE: &str = "maven-metadata.xml";

/// Freshness windows for cached repository files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtl {
    /// Window for `maven-metadata.xml`, which changes with every release.
    #[serde(with = "humantime_serde", default = "default_metadata_ttl")]
    pub metadata: Duration,
    /// Window for artifacts and descriptors.
    #[serde(with = "humantime_serde", default = "default_artifact_ttl")]
    pub artifact: Duration,
}

const fn default_metadata_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

const fn default_artifact_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            metadata: default_metadata_ttl(),
            artifact: default_artifact_ttl(),
        }
    }
}

/// A local mirror of one Maven repository, rooted at `<cache>/<name>`.
pub struct MavenCache {
    name: String,
    repository: String,
    root: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
    ttl: CacheTtl,
    locks: KeyedLocks<PathBuf>,
}

impl std::fmt::Debug for MavenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavenCache")
            .field("name", &self.name)
            .field("repository", &self.repository)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl MavenCache {
    /// Creates a mirror of `repository` stored under `cache_root/name`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        repository: &str,
        cache_root: &Path,
        fetcher: Arc<dyn RemoteFetcher>,
        ttl: CacheTtl,
    ) -> Self {
        let name = name.into();
        let mut repository = repository.to_string();
        if !repository.ends_with('/') {
            repository.push('/');
        }
        Self {
            root: cache_root.join(&name),
            name,
            repository,
            fetcher,
            ttl,
            locks: KeyedLocks::new(),
        }
    }

    /// Short name of this mirror, also its directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository base URL, always ending in `/`.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.repository
    }

    /// Local directory holding the mirror.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `coordinate` lives locally, whether or not it has been fetched.
    pub fn local_path(&self, coordinate: &Coordinate) -> Result<PathBuf, CacheError> {
        coordinate
            .path()
            .map(|path| self.root.join(path))
            .ok_or_else(|| CacheError::Unversioned {
                coordinate: coordinate.to_string(),
            })
    }

    /// Whether `coordinate` is already present locally. Never touches the
    /// network.
    #[must_use]
    pub fn exists(&self, coordinate: &Coordinate) -> bool {
        self.local_path(coordinate).is_ok_and(|path| path.is_file())
    }

    /// Returns a local copy of `coordinate`, downloading it if needed.
    ///
    /// `Ok(None)` means the repository does not publish the artifact.
    pub fn download(&self, coordinate: &Coordinate) -> Result<Option<PathBuf>, CacheError> {
        let relative = coordinate.path().ok_or_else(|| CacheError::Unversioned {
            coordinate: coordinate.to_string(),
        })?;
        self.fetch(&relative, self.ttl.artifact)
    }

    /// Returns a local copy of the artifact's `maven-metadata.xml`.
    pub fn download_metadata(
        &self,
        coordinate: &Coordinate,
    ) -> Result<Option<PathBuf>, CacheError> {
        let relative = format!("{}/{METADATA_FILE}", coordinate.module_folder());
        self.fetch(&relative, self.ttl.metadata)
    }

    /// Every version listed in the artifact's metadata, in document order.
    pub fn versions(&self, coordinate: &Coordinate) -> Result<Vec<String>, CacheError> {
        let path = self
            .download_metadata(coordinate)?
            .ok_or_else(|| CacheError::Missing {
                what: "repository metadata",
                key: coordinate.to_string(),
            })?;
        let xml = fs::read_to_string(&path).map_err(|e| CacheError::io(&path, &e))?;
        Ok(parse_metadata_versions(&xml))
    }

    fn fetch(&self, relative: &str, ttl: Duration) -> Result<Option<PathBuf>, CacheError> {
        let target = self.root.join(relative);
        let url = format!("{}{relative}", self.repository);
        self.locks
            .with(&target, || self.fetch_locked(&url, &target, ttl))
    }

    fn fetch_locked(
        &self,
        url: &str,
        target: &Path,
        ttl: Duration,
    ) -> Result<Option<PathBuf>, CacheError> {
        if target.is_file() {
            if is_fresh(target, ttl) {
                return Ok(Some(target.to_path_buf()));
            }

            match published_digest(self.fetcher.as_ref(), url) {
                Ok(None) => {
                    touch(target)?;
                    return Ok(Some(target.to_path_buf()));
                },
                Ok(Some(published)) => {
                    let (matches, actual) = published.check(target)?;
                    if matches {
                        touch(target)?;
                        return Ok(Some(target.to_path_buf()));
                    }
                    debug!(
                        url,
                        expected = %published.digest,
                        actual = %actual,
                        "cached file is outdated"
                    );
                    fs::remove_file(target).map_err(|e| CacheError::io(target, &e))?;
                    return self.refetch_verified(url, target, &published);
                },
                Err(err) => {
                    warn!(url, error = %err, "could not check cached file, reusing it");
                    return Ok(Some(target.to_path_buf()));
                },
            }
        }

        if fetch_atomic(self.fetcher.as_ref(), url, target)? {
            Ok(Some(target.to_path_buf()))
        } else {
            Ok(None)
        }
    }

    /// Downloads a replacement and verifies it once against `published`.
    fn refetch_verified(
        &self,
        url: &str,
        target: &Path,
        published: &PublishedDigest,
    ) -> Result<Option<PathBuf>, CacheError> {
        if !fetch_atomic(self.fetcher.as_ref(), url, target)? {
            return Ok(None);
        }
        let (matches, actual) = published.check(target)?;
        if !matches {
            fs::remove_file(target).map_err(|e| CacheError::io(target, &e))?;
            return Err(CacheError::HashMismatch {
                url: url.to_string(),
                algorithm: published.algorithm.extension(),
                expected: published.digest.clone(),
                actual,
            });
        }
        Ok(Some(target.to_path_buf()))
    }
}

/// Extracts every `<version>` entry from a `maven-metadata.xml` document.
#[must_use]
pub fn parse_metadata_versions(xml: &str) -> Vec<String> {
    const OPEN: &str = "<version>";
    const CLOSE: &str = "</version>";

    let mut versions = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        let version = after[..end].trim();
        if !version.is_empty() {
            versions.push(version.to_string());
        }
        rest = &after[end + CLOSE.len()..];
    }
    versions
}
