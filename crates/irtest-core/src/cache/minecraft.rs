//! Mirror of the game's launcher metadata and distribution jars.
//!
//! Layout under `<cache>/minecraft`:
//!
//! ```text
//! version_manifest.json
//! versions/<id>/<id>.json
//! versions/<id>/<id>-client.jar
//! versions/<id>/<id>-server.jar
//! ```
//!
//! Library downloads from the game's own repository go through an embedded
//! [`MavenCache`] rooted at `<cache>/libraries`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::{CacheError, CacheTtl, MavenCache, RemoteFetcher, fetch_atomic, is_fresh, read_json};
use crate::hash::sha1_file;
use crate::profile::VersionDescriptor;
use crate::sync::{KeyedLocks, OnceMap, lock};

const MANIFEST_FILE: &str = "version_manifest.json";

/// The launcher's list of released game versions.
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherManifest {
    /// Every listed version.
    #[serde(default)]
    pub versions: Vec<ManifestVersion>,
}

/// One entry of the launcher manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestVersion {
    /// Version id, e.g. `1.20.1`.
    pub id: String,
    /// Descriptor URL.
    pub url: String,
}

impl LauncherManifest {
    /// Descriptor URL for `version`.
    #[must_use]
    pub fn url(&self, version: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|entry| entry.id == version)
            .map(|entry| entry.url.as_str())
    }
}

type Memo<T> = Result<T, CacheError>;

/// Mirror of launcher metadata, version descriptors and distribution jars.
pub struct MinecraftCache {
    root: PathBuf,
    manifest_url: String,
    fetcher: Arc<dyn RemoteFetcher>,
    ttl: Duration,
    libraries: MavenCache,
    manifest: Mutex<Option<Arc<LauncherManifest>>>,
    descriptors: OnceMap<String, Memo<Arc<VersionDescriptor>>>,
    downloads: OnceMap<(String, String), Memo<Option<PathBuf>>>,
    locks: KeyedLocks<PathBuf>,
}

impl std::fmt::Debug for MinecraftCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinecraftCache")
            .field("root", &self.root)
            .field("manifest_url", &self.manifest_url)
            .field("libraries", &self.libraries)
            .finish_non_exhaustive()
    }
}

impl MinecraftCache {
    /// Creates the mirror under `cache_root/minecraft`, with game libraries
    /// from `libraries_repository` under `cache_root/libraries`.
    #[must_use]
    pub fn new(
        cache_root: &Path,
        manifest_url: impl Into<String>,
        libraries_repository: &str,
        fetcher: Arc<dyn RemoteFetcher>,
        ttl: CacheTtl,
    ) -> Self {
        Self {
            root: cache_root.join("minecraft"),
            manifest_url: manifest_url.into(),
            libraries: MavenCache::new(
                "libraries",
                libraries_repository,
                cache_root,
                Arc::clone(&fetcher),
                ttl,
            ),
            fetcher,
            ttl: ttl.artifact,
            manifest: Mutex::new(None),
            descriptors: OnceMap::new(),
            downloads: OnceMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    /// The game's library repository mirror.
    #[must_use]
    pub const fn libraries(&self) -> &MavenCache {
        &self.libraries
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join("versions").join(version)
    }

    /// Local path of the cached descriptor for `version`.
    #[must_use]
    pub fn descriptor_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(format!("{version}.json"))
    }

    /// Loads the launcher manifest, refreshing it once its window elapses.
    pub fn launcher_manifest(&self) -> Result<Arc<LauncherManifest>, CacheError> {
        let mut slot = lock(&self.manifest);
        if let Some(manifest) = slot.as_ref() {
            return Ok(Arc::clone(manifest));
        }

        let path = self.root.join(MANIFEST_FILE);
        if !is_fresh(&path, self.ttl) {
            match fetch_atomic(self.fetcher.as_ref(), &self.manifest_url, &path) {
                Ok(true) => {},
                Ok(false) if path.is_file() => {
                    warn!(url = %self.manifest_url, "launcher manifest vanished, using cached copy");
                },
                Ok(false) => {
                    return Err(CacheError::Missing {
                        what: "launcher manifest",
                        key: self.manifest_url.clone(),
                    });
                },
                Err(err) if path.is_file() => {
                    warn!(error = %err, "launcher manifest refresh failed, using cached copy");
                },
                Err(err) => return Err(err),
            }
        }

        let manifest = Arc::new(read_json::<LauncherManifest>(&path, "launcher manifest")?);
        *slot = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// The parsed descriptor for game `version`, computed once per run.
    pub fn version_descriptor(&self, version: &str) -> Result<Arc<VersionDescriptor>, CacheError> {
        self.descriptors
            .get_or_init(&version.to_string(), || self.load_descriptor(version))
    }

    fn load_descriptor(&self, version: &str) -> Memo<Arc<VersionDescriptor>> {
        let manifest = self.launcher_manifest()?;
        let url = manifest.url(version).ok_or_else(|| CacheError::Missing {
            what: "game version",
            key: version.to_string(),
        })?;
        let path = self.descriptor_path(version);
        let expected = bucket_hash(url);

        self.locks.with(&path, || {
            let valid = path.is_file()
                && match expected {
                    Some(expected) => sha1_file(&path).is_ok_and(|actual| actual == expected),
                    None => is_fresh(&path, self.ttl),
                };
            if !valid && !fetch_atomic(self.fetcher.as_ref(), url, &path)? {
                return Err(CacheError::Missing {
                    what: "version descriptor",
                    key: url.to_string(),
                });
            }
            Ok(())
        })?;

        match read_json::<VersionDescriptor>(&path, "version descriptor") {
            Ok(descriptor) => Ok(Arc::new(descriptor)),
            Err(err) => {
                // Corrupt descriptors are discarded so the next run refetches.
                if let Err(remove) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove, "failed to discard corrupt descriptor");
                }
                Err(err)
            },
        }
    }

    /// Whether the `key` distribution jar of `version` is already cached.
    #[must_use]
    pub fn has_download(&self, version: &str, key: &str) -> bool {
        self.version_dir(version)
            .join(format!("{version}-{key}.jar"))
            .is_file()
    }

    /// Local copy of the `key` (`client`/`server`) distribution of `version`.
    ///
    /// `Ok(None)` means the descriptor does not publish that download.
    pub fn download(&self, version: &str, key: &str) -> Result<Option<PathBuf>, CacheError> {
        self.downloads
            .get_or_init(&(version.to_string(), key.to_string()), || {
                self.load_download(version, key)
            })
    }

    fn load_download(&self, version: &str, key: &str) -> Memo<Option<PathBuf>> {
        let descriptor = self.version_descriptor(version)?;
        let Some(download) = descriptor.downloads.get(key) else {
            return Ok(None);
        };
        let extension = download
            .url
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.contains('/'))
            .unwrap_or("jar");
        let path = self
            .version_dir(version)
            .join(format!("{version}-{key}.{extension}"));

        self.locks.with(&path, || {
            let expected = download.sha1.as_deref().filter(|s| !s.is_empty());
            if path.is_file() {
                let Some(expected) = expected else {
                    return Ok(Some(path.clone()));
                };
                if sha1_file(&path).is_ok_and(|actual| actual.eq_ignore_ascii_case(expected)) {
                    return Ok(Some(path.clone()));
                }
            }

            if !fetch_atomic(self.fetcher.as_ref(), &download.url, &path)? {
                return Ok(None);
            }
            if let Some(expected) = expected {
                let actual = sha1_file(&path).map_err(|e| CacheError::io(&path, &e))?;
                if !actual.eq_ignore_ascii_case(expected) {
                    let _ = fs::remove_file(&path);
                    return Err(CacheError::HashMismatch {
                        url: download.url.clone(),
                        algorithm: "sha1",
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            Ok(Some(path.clone()))
        })
    }
}

/// Descriptor URLs embed the file's SHA-1 as the parent path segment.
fn bucket_hash(url: &str) -> Option<String> {
    let mut segments = url.rsplit('/');
    segments.next()?;
    segments
        .next()
        .filter(|segment| segment.len() == 40 && segment.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::MemoryFetcher;
    use crate::hash::HashAlgorithm;

    const MANIFEST_URL: &str = "https://meta.test/version_manifest.json";

    fn descriptor_json() -> String {
        r#"{
            "id": "1.20.1",
            "downloads": {
                "client": { "url": "https://dl.test/client.jar", "sha1": "CLIENT_SHA" },
                "server": { "url": "https://dl.test/server.jar" }
            },
            "javaVersion": { "component": "java-runtime-gamma", "majorVersion": 17 }
        }"#
        .replace("CLIENT_SHA", &HashAlgorithm::Sha1.hash_bytes(b"client"))
    }

    fn setup() -> (tempfile::TempDir, Arc<MemoryFetcher>, MinecraftCache, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(MemoryFetcher::default());
        let descriptor = descriptor_json();
        let hash = HashAlgorithm::Sha1.hash_bytes(descriptor.as_bytes());
        let descriptor_url = format!("https://meta.test/v1/packages/{hash}/1.20.1.json");
        fetcher.put(
            MANIFEST_URL,
            format!(r#"{{"versions":[{{"id":"1.20.1","url":"{descriptor_url}"}}]}}"#),
        );
        fetcher.put(&descriptor_url, descriptor);
        fetcher.put("https://dl.test/client.jar", b"client".to_vec());
        fetcher.put("https://dl.test/server.jar", b"server".to_vec());

        let cache = MinecraftCache::new(
            dir.path(),
            MANIFEST_URL,
            "https://libraries.test/",
            Arc::clone(&fetcher) as Arc<dyn RemoteFetcher>,
            CacheTtl::default(),
        );
        (dir, fetcher, cache, descriptor_url)
    }

    #[test]
    fn resolves_descriptor_once() {
        let (_dir, fetcher, cache, descriptor_url) = setup();
        let first = cache.version_descriptor("1.20.1").expect("descriptor");
        let second = cache.version_descriptor("1.20.1").expect("descriptor");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.required_runtime("1.20.1"), 17);
        assert_eq!(fetcher.count(MANIFEST_URL), 1);
        assert_eq!(fetcher.count(&descriptor_url), 1);
    }

    #[test]
    fn unknown_version_is_missing() {
        let (_dir, _fetcher, cache, _) = setup();
        let err = cache.version_descriptor("0.0.1").expect_err("unknown");
        assert!(matches!(err, CacheError::Missing { .. }));
    }

    #[test]
    fn downloads_distribution_jars() {
        let (_dir, fetcher, cache, _) = setup();
        assert!(!cache.has_download("1.20.1", "client"));
        let client = cache
            .download("1.20.1", "client")
            .expect("client")
            .expect("present");
        assert_eq!(fs::read(&client).expect("read"), b"client");
        assert!(cache.has_download("1.20.1", "client"));
        assert!(client.ends_with("versions/1.20.1/1.20.1-client.jar"));

        cache.download("1.20.1", "client").expect("client");
        assert_eq!(fetcher.count("https://dl.test/client.jar"), 1);
        assert_eq!(cache.download("1.20.1", "mappings").expect("absent"), None);
    }

    #[test]
    fn reuses_descriptor_matching_bucket_hash() {
        let (dir, fetcher, _cache, descriptor_url) = setup();
        let cache = || {
            MinecraftCache::new(
                dir.path(),
                MANIFEST_URL,
                "https://libraries.test/",
                Arc::clone(&fetcher) as Arc<dyn RemoteFetcher>,
                CacheTtl::default(),
            )
        };
        cache().version_descriptor("1.20.1").expect("first");
        cache().version_descriptor("1.20.1").expect("second");
        assert_eq!(fetcher.count(&descriptor_url), 1);
    }

    #[test]
    fn extracts_bucket_hash() {
        let hash = "a".repeat(40);
        assert_eq!(
            bucket_hash(&format!("https://x/v1/packages/{hash}/1.json")),
            Some(hash)
        );
        assert_eq!(bucket_hash("https://x/v1/packages/short/1.json"), None);
    }
}
