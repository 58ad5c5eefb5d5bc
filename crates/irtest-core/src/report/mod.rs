//! Persisted per-version test reports.
//!
//! Every tested version owns a directory under the reports root:
//!
//! ```text
//! <reports>/<version>/cache.json            identity, hash, flags, test schema versions
//! <reports>/<version>/<test>.json           one result per test kind
//! <reports>/<version>/<test>.log.gz         captured console output
//! <reports>/_global/<flag>.txt              versions carrying each flag
//! ```
//!
//! A [`Report`] is shared between the driving thread and worker tasks, so its
//! mutable state sits behind a mutex and every accessor copies out.

mod globals;
mod log;
mod test;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use globals::{FAILURES, GlobalIndex, NO_INSTALLER, NO_SERVER_JAR};
pub use log::{Indent, LogLevel, LogLine, TaskLog, replay};
pub use test::{
    INCORRECT_SERVER_JAR, LEGACY_JAVA_FIXER, TestDetail, TestKind, TestResult, VERSION_TOKEN,
    canonical_path,
};

use crate::coordinate::{ComparableVersion, Coordinate};
use crate::profile::{InstallProfile, ProfileFormat};
use crate::sync::lock;

/// Report metadata document name.
pub const CACHE_JSON: &str = "cache.json";

/// Directory under the reports root holding the global flag index.
pub const GLOBAL_DIR: &str = "_global";

/// Errors raised while reading or writing reports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    /// Filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A stored document could not be parsed.
    #[error("malformed report file {}: {reason}", path.display())]
    Malformed {
        /// Document path.
        path: PathBuf,
        /// Parser error.
        reason: String,
    },

    /// A document could not be serialized.
    #[error("failed to encode {what}: {reason}")]
    Encode {
        /// What was being written.
        what: &'static str,
        /// Serializer error.
        reason: String,
    },
}

impl ReportError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Writes `bytes` to a staging file beside `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    use std::io::Write;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
    let mut staging = tempfile::Builder::new()
        .prefix(".write-")
        .tempfile_in(parent)
        .map_err(|e| ReportError::io(parent, e))?;
    staging
        .write_all(bytes)
        .map_err(|e| ReportError::io(staging.path(), e))?;
    staging
        .persist(path)
        .map_err(|e| ReportError::io(path, e.error))?;
    Ok(())
}

/// On-disk form of `cache.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CacheData {
    coordinate: Coordinate,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    globals: BTreeSet<String>,
    #[serde(default)]
    tests: BTreeMap<String, u32>,
    #[serde(default)]
    format: Option<ProfileFormat>,
    #[serde(default)]
    executable_jar: Option<String>,
}

#[derive(Debug, Default)]
struct ReportState {
    hash: Option<String>,
    globals: BTreeSet<String>,
    tests: BTreeMap<TestKind, u32>,
    results: BTreeMap<TestKind, TestResult>,
    dirty: BTreeSet<TestKind>,
    format: Option<ProfileFormat>,
    executable_jar: Option<String>,
    installer: Option<PathBuf>,
    profile: Option<Arc<InstallProfile>>,
}

impl ReportState {
    fn forget_tests(&mut self) {
        self.globals.clear();
        self.tests.clear();
        self.results.clear();
        self.dirty.clear();
    }
}

/// Everything known about one version.
#[derive(Debug)]
pub struct Report {
    coordinate: Coordinate,
    version: ComparableVersion,
    dir: PathBuf,
    state: Mutex<ReportState>,
    log: TaskLog,
}

impl Report {
    /// An empty report for `coordinate`, persisted under `dir`.
    #[must_use]
    pub fn new(coordinate: Coordinate, dir: PathBuf) -> Self {
        let version = ComparableVersion::new(coordinate.version().unwrap_or_default());
        Self {
            coordinate,
            version,
            dir,
            state: Mutex::new(ReportState::default()),
            log: TaskLog::new(),
        }
    }

    /// Reads the report stored under `dir`, or `Ok(None)` if there is none.
    ///
    /// Test entries are kept only when `cache.json` lists them at the current
    /// schema version and their result document is readable.
    pub fn load(dir: &Path, coordinate: &Coordinate) -> Result<Option<Self>, ReportError> {
        let path = dir.join(CACHE_JSON);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReportError::io(&path, e)),
        };
        let data: CacheData =
            serde_json::from_slice(&bytes).map_err(|e| ReportError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let report = Self::new(coordinate.clone(), dir.to_path_buf());
        {
            let mut state = lock(&report.state);
            state.hash = data.hash;
            state.globals = data.globals;
            state.format = data.format;
            state.executable_jar = data.executable_jar;

            for (name, version) in data.tests {
                let Some(kind) = TestKind::from_name(&name) else {
                    continue;
                };
                if version != kind.schema_version() {
                    continue;
                }
                match TestResult::load(dir, kind) {
                    Ok(Some(result)) => {
                        state.tests.insert(kind, version);
                        state.results.insert(kind, result);
                    },
                    Ok(None) => {},
                    Err(err) => report.log.warn(format!("Discarding {kind}: {err}")),
                }
            }
        }
        Ok(Some(report))
    }

    /// Writes `cache.json` and every result attached since the last save.
    ///
    /// `cache.json` is left untouched when its content would not change.
    pub fn save(&self) -> Result<(), ReportError> {
        let mut state = lock(&self.state);
        let data = CacheData {
            coordinate: self.coordinate.clone(),
            hash: state.hash.clone(),
            globals: state.globals.clone(),
            tests: state
                .tests
                .iter()
                .map(|(kind, version)| (kind.name().to_string(), *version))
                .collect(),
            format: state.format,
            executable_jar: state.executable_jar.clone(),
        };
        let json = serde_json::to_vec_pretty(&data).map_err(|e| ReportError::Encode {
            what: CACHE_JSON,
            reason: e.to_string(),
        })?;

        let path = self.dir.join(CACHE_JSON);
        if fs::read(&path).ok().as_deref() != Some(json.as_slice()) {
            write_atomic(&path, &json)?;
        }

        let dirty = std::mem::take(&mut state.dirty);
        for kind in dirty {
            if let Some(result) = state.results.get(&kind) {
                result.save(&self.dir)?;
            }
        }
        Ok(())
    }

    /// The installer coordinate.
    #[must_use]
    pub const fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// The version under test.
    #[must_use]
    pub const fn version(&self) -> &ComparableVersion {
        &self.version
    }

    /// Directory this report is persisted in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Buffered log lines for this version.
    #[must_use]
    pub const fn log(&self) -> &TaskLog {
        &self.log
    }

    /// Installer digest, `None` if never downloaded.
    #[must_use]
    pub fn hash(&self) -> Option<String> {
        lock(&self.state).hash.clone()
    }

    /// Records the digest of the freshly downloaded installer.
    ///
    /// Returns `true` when it differs from the recorded digest, in which case
    /// every recorded test is forgotten.
    pub fn observe_hash(&self, fresh: &str) -> bool {
        let mut state = lock(&self.state);
        if state.hash.as_deref() == Some(fresh) {
            return false;
        }
        state.hash = Some(fresh.to_string());
        state.forget_tests();
        true
    }

    /// Records that no installer is published for this version.
    pub fn mark_missing(&self) {
        let mut state = lock(&self.state);
        state.hash = None;
        state.format = None;
        state.executable_jar = None;
        state.installer = None;
        state.profile = None;
        state.forget_tests();
    }

    /// Whether every test is recorded at its current schema version.
    #[must_use]
    pub fn is_fully_cached(&self) -> bool {
        let state = lock(&self.state);
        state.tests.len() == TestKind::ALL.len()
            && TestKind::ALL
                .iter()
                .all(|kind| state.tests.get(kind) == Some(&kind.schema_version()))
    }

    /// Whether `kind` is recorded at its current schema version.
    #[must_use]
    pub fn is_cached(&self, kind: TestKind) -> bool {
        lock(&self.state).tests.get(&kind) == Some(&kind.schema_version())
    }

    /// Attaches a fresh result, superseding any previous one of its kind.
    pub fn attach(&self, result: TestResult) {
        let mut state = lock(&self.state);
        let kind = result.kind();
        state.tests.insert(kind, result.version());
        state.results.insert(kind, result);
        state.dirty.insert(kind);
    }

    /// The current result of `kind`.
    #[must_use]
    pub fn result(&self, kind: TestKind) -> Option<TestResult> {
        lock(&self.state).results.get(&kind).cloned()
    }

    /// Every current result.
    #[must_use]
    pub fn results(&self) -> Vec<TestResult> {
        lock(&self.state).results.values().cloned().collect()
    }

    /// Whether every current result passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        lock(&self.state).results.values().all(TestResult::is_success)
    }

    /// Raises a report-level flag.
    pub fn add_global(&self, flag: impl Into<String>) {
        lock(&self.state).globals.insert(flag.into());
    }

    /// Report-level flags.
    #[must_use]
    pub fn globals(&self) -> BTreeSet<String> {
        lock(&self.state).globals.clone()
    }

    /// Stores the parsed profile and the facts derived from it.
    pub fn set_profile(&self, profile: Arc<InstallProfile>) {
        let mut state = lock(&self.state);
        state.format = Some(profile.format());
        state.executable_jar = profile.executable_jar();
        state.profile = Some(profile);
    }

    /// The parsed profile, when parsed this run.
    #[must_use]
    pub fn profile(&self) -> Option<Arc<InstallProfile>> {
        lock(&self.state).profile.clone()
    }

    /// Detected profile layout.
    #[must_use]
    pub fn format(&self) -> Option<ProfileFormat> {
        lock(&self.state).format
    }

    /// Server jar launched by the run test.
    #[must_use]
    pub fn executable_jar(&self) -> Option<String> {
        lock(&self.state).executable_jar.clone()
    }

    /// Local installer path, when downloaded this run.
    #[must_use]
    pub fn installer(&self) -> Option<PathBuf> {
        lock(&self.state).installer.clone()
    }

    /// Records the local installer path.
    pub fn set_installer(&self, path: PathBuf) {
        lock(&self.state).installer = Some(path);
    }
}

/// Locates and loads reports under one root directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    /// A store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The reports root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `version`.
    #[must_use]
    pub fn dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    /// Directory of the global flag index.
    #[must_use]
    pub fn global_dir(&self) -> PathBuf {
        self.root.join(GLOBAL_DIR)
    }

    /// The stored report for `coordinate`, or an empty one when none is
    /// stored or the stored one is unreadable.
    #[must_use]
    pub fn load_or_create(&self, coordinate: &Coordinate) -> Report {
        let dir = self.dir(coordinate.version().unwrap_or_default());
        match Report::load(&dir, coordinate) {
            Ok(Some(report)) => report,
            Ok(None) => Report::new(coordinate.clone(), dir),
            Err(err) => {
                let report = Report::new(coordinate.clone(), dir);
                report
                    .log()
                    .error(format!("Failed to read stored report, starting over: {err}"));
                report
            },
        }
    }
}
