//! Harness configuration.
//!
//! Configuration is read from an optional TOML file. Every field has a
//! default, so an empty file (or no file) describes a complete run against
//! the public Forge repository.
//!
//! ```toml
//! repository = "https://maven.minecraftforge.net/"
//! artifact = "net.minecraftforge:forge"
//! idle_timeout = "90s"
//!
//! [selection]
//! only = "1.20.1"
//!
//! [[classifiers]]
//! name = "port-in-use"
//! pattern = "FAILED TO BIND TO PORT"
//! flag = "port_in_use"
//! fail = "Port already in use"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheTtl;
use crate::classify::{ClassifierSet, ClassifierSpec, PatternError};
use crate::coordinate::{ComparableVersion, Coordinate};
use crate::profile::{FORGE_MAVEN, LEGACY_FORGE_MAVEN, MOJANG_LIBRARIES};
use crate::scheduler::default_width;

/// Default launcher manifest location.
pub const LAUNCHER_MANIFEST: &str =
    "https://launchermeta.mojang.com/mc/game/version_manifest.json";

/// First server port handed out to run tests.
pub const DEFAULT_BASE_PORT: u16 = 25566;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Repository publishing the installers.
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Installer coordinate, `group:name`.
    #[serde(default = "default_artifact")]
    pub artifact: String,

    /// Working directory for installations.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Download cache directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Report directory.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Which versions to test.
    #[serde(default)]
    pub selection: VersionSelection,

    /// Re-run tests even when their results are cached.
    #[serde(default)]
    pub force: bool,

    /// Round runtime requirements up to the next long-term-support release.
    #[serde(default)]
    pub lts: bool,

    /// Worker threads per stage; defaults to the host's parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    /// How long a server may stay silent before it is killed.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// Cache freshness windows.
    #[serde(default)]
    pub ttl: CacheTtl,

    /// First port assigned to booted servers.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Upstream locations.
    #[serde(default)]
    pub mirrors: MirrorConfig,

    /// Runtime discovery.
    #[serde(default)]
    pub runtimes: RuntimeConfig,

    /// Extra output classifiers, run after the built-in ones.
    #[serde(default)]
    pub classifiers: Vec<ClassifierSpec>,
}

fn default_repository() -> String {
    FORGE_MAVEN.to_string()
}

fn default_artifact() -> String {
    "net.minecraftforge:forge".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

const fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            artifact: default_artifact(),
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            reports_dir: default_reports_dir(),
            selection: VersionSelection::default(),
            force: false,
            lts: false,
            workers: None,
            idle_timeout: default_idle_timeout(),
            ttl: CacheTtl::default(),
            base_port: default_base_port(),
            mirrors: MirrorConfig::default(),
            runtimes: RuntimeConfig::default(),
            classifiers: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Serializes configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let coordinate = self.coordinate()?;
        if coordinate.version().is_some() {
            return Err(ConfigError::Validation(format!(
                "artifact {} must not carry a version",
                self.artifact
            )));
        }
        for (name, url) in [
            ("repository", self.repository.as_str()),
            ("mirrors.libraries", self.mirrors.libraries.as_str()),
            ("mirrors.launcher_manifest", self.mirrors.launcher_manifest.as_str()),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Validation("workers must be at least 1".to_string()));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        self.classifier_set()?;
        Ok(())
    }

    /// The installer coordinate without a version.
    ///
    /// # Errors
    ///
    /// Returns an error if `artifact` is not a coordinate.
    pub fn coordinate(&self) -> Result<Coordinate, ConfigError> {
        Coordinate::parse(&self.artifact)
            .map_err(|e| ConfigError::Validation(format!("artifact: {e}")))
    }

    /// Worker threads per stage.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_width).max(1)
    }

    /// The built-in classifiers followed by the configured ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured pattern does not compile.
    pub fn classifier_set(&self) -> Result<ClassifierSet, ConfigError> {
        Ok(ClassifierSet::with_extra(&self.classifiers)?)
    }

    /// Repository for libraries that name [`FORGE_MAVEN`], which is the
    /// legacy address when testing against the canonical repository.
    #[must_use]
    pub fn library_repository(&self) -> &str {
        if self.repository.trim_end_matches('/') == FORGE_MAVEN.trim_end_matches('/') {
            &self.mirrors.legacy_repository
        } else {
            &self.repository
        }
    }
}

/// Upstream locations for game files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Game library repository.
    #[serde(default = "default_libraries")]
    pub libraries: String,

    /// Launcher version manifest.
    #[serde(default = "default_launcher_manifest")]
    pub launcher_manifest: String,

    /// Address old profiles use for the installer repository.
    #[serde(default = "default_legacy_repository")]
    pub legacy_repository: String,
}

fn default_libraries() -> String {
    MOJANG_LIBRARIES.to_string()
}

fn default_launcher_manifest() -> String {
    LAUNCHER_MANIFEST.to_string()
}

fn default_legacy_repository() -> String {
    LEGACY_FORGE_MAVEN.to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            libraries: default_libraries(),
            launcher_manifest: default_launcher_manifest(),
            legacy_repository: default_legacy_repository(),
        }
    }
}

/// Runtime discovery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directories searched for runtime homes before the platform defaults.
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
}

/// Which discovered versions the download and test stages consider.
///
/// Versions outside the selection are still aggregated from their stored
/// reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSelection {
    /// A single version. Without a `-` it also selects every `<only>-*`
    /// version, so a game version selects its whole line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<String>,

    /// Lowest selected version, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// First version past the selection, exclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl VersionSelection {
    /// Whether no restriction applies.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        self.only.is_none() && self.start.is_none() && self.end.is_none()
    }

    /// Whether `version` is selected.
    #[must_use]
    pub fn matches(&self, version: &str) -> bool {
        if let Some(only) = &self.only {
            let prefix_match = !only.contains('-')
                && version
                    .strip_prefix(only.as_str())
                    .is_some_and(|rest| rest.starts_with('-'));
            return version == only || prefix_match;
        }
        let parsed = ComparableVersion::new(version);
        if let Some(start) = &self.start {
            if parsed < ComparableVersion::new(start) {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if parsed >= ComparableVersion::new(end) {
                return false;
            }
        }
        true
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A classifier pattern does not compile.
    #[error("configuration validation failed: {0}")]
    InvalidPattern(#[from] PatternError),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
