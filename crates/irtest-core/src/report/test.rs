//! Individual test results and their on-disk form.
//!
//! Each result is stored as `<name>.json` in the version's report directory,
//! with its captured console output beside it as `<name>.log.gz`. A stored
//! result whose schema version differs from the kind's current version is
//! read back as absent.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use super::{ReportError, write_atomic};
use crate::profile::Side;

/// Placeholder substituted for the version string in installed file paths.
pub const VERSION_TOKEN: &str = "[VERSION]";

/// Flag raised when a server needed the legacy runtime workaround.
pub const LEGACY_JAVA_FIXER: &str = "legacy_java_fixer";

/// Flag raised when a server's classpath points at the wrong vanilla jar.
pub const INCORRECT_SERVER_JAR: &str = "incorrect_server_jar";

/// The kinds of test run against every version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestKind {
    /// Client installation.
    ClientInstall,
    /// Dedicated server installation.
    ServerInstall,
    /// Booting the installed server.
    ServerRun,
}

impl TestKind {
    /// Every kind, in execution order.
    pub const ALL: [Self; 3] = [Self::ClientInstall, Self::ServerInstall, Self::ServerRun];

    /// Stable name used for file names and cache keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClientInstall => "client-install",
            Self::ServerInstall => "server-install",
            Self::ServerRun => "server-run",
        }
    }

    /// Current schema version. Bumping it invalidates every stored result of
    /// this kind.
    #[must_use]
    pub const fn schema_version(self) -> u32 {
        match self {
            Self::ClientInstall | Self::ServerInstall | Self::ServerRun => 1,
        }
    }

    /// The install test for `side`.
    #[must_use]
    pub const fn install(side: Side) -> Self {
        match side {
            Side::Client => Self::ClientInstall,
            Side::Server => Self::ServerInstall,
        }
    }

    /// Looks a kind up by [`name`](Self::name).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    const fn is_install(self) -> bool {
        matches!(self, Self::ClientInstall | Self::ServerInstall)
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific result data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestDetail {
    /// Result of an installer run.
    Install {
        /// Installed files, relative to the install root, with the version
        /// replaced by [`VERSION_TOKEN`].
        #[serde(default)]
        files: BTreeSet<String>,
        /// Digest of the installer when the install failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_hash: Option<String>,
    },
    /// Result of booting a server.
    Run {
        /// The server needed the legacy runtime workaround.
        #[serde(default)]
        legacy_java_fixer: bool,
        /// Classpath entry naming the wrong vanilla jar.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        incorrect_server_jar: Option<String>,
        /// Classpath entries missing on disk.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing_dependencies: Vec<String>,
        /// Process exit code, or the timeout sentinel.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

/// The outcome of one test against one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    kind: TestKind,
    version: u32,
    success: bool,
    message: Option<String>,
    globals: BTreeSet<String>,
    log: Vec<String>,
    detail: TestDetail,
}

#[derive(Serialize)]
struct StoredRef<'a> {
    version: u32,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    globals: &'a BTreeSet<String>,
    detail: &'a TestDetail,
}

#[derive(Deserialize)]
struct Stored {
    version: u32,
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    globals: BTreeSet<String>,
    detail: TestDetail,
}

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    version: u32,
}

impl TestResult {
    /// A failed result of `kind` with no message yet.
    #[must_use]
    pub fn new(kind: TestKind) -> Self {
        let detail = if kind.is_install() {
            TestDetail::Install {
                files: BTreeSet::new(),
                failed_hash: None,
            }
        } else {
            TestDetail::Run {
                legacy_java_fixer: false,
                incorrect_server_jar: None,
                missing_dependencies: Vec::new(),
                exit_code: None,
            }
        };
        Self {
            kind,
            version: kind.schema_version(),
            success: false,
            message: None,
            globals: BTreeSet::new(),
            log: Vec::new(),
            detail,
        }
    }

    /// Which test this is.
    #[must_use]
    pub const fn kind(&self) -> TestKind {
        self.kind
    }

    /// Schema version the result was produced under.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Whether the test passed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    /// Human readable outcome, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Flags raised by this test.
    #[must_use]
    pub const fn globals(&self) -> &BTreeSet<String> {
        &self.globals
    }

    /// Captured console lines.
    #[must_use]
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Kind-specific data.
    #[must_use]
    pub const fn detail(&self) -> &TestDetail {
        &self.detail
    }

    /// Marks the test passed.
    pub fn succeed(&mut self, message: Option<String>) {
        self.success = true;
        self.message = message;
    }

    /// Marks the test failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.message = Some(message.into());
    }

    /// Appends a console line.
    pub fn log_line(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Raises `flag` on this test.
    pub fn add_global(&mut self, flag: impl Into<String>) {
        self.globals.insert(flag.into());
    }

    /// Records an installed file, canonicalizing separators and replacing
    /// `version` with [`VERSION_TOKEN`]. Ignored for run results.
    pub fn add_file(&mut self, relative: &str, version: &str) {
        if let TestDetail::Install { files, .. } = &mut self.detail {
            files.insert(canonical_path(relative, version));
        }
    }

    /// Installed files, empty for run results.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        match &self.detail {
            TestDetail::Install { files, .. } => files.iter().map(String::as_str).collect(),
            TestDetail::Run { .. } => Vec::new(),
        }
    }

    /// Records the installer digest of a failed install.
    pub fn set_failed_hash(&mut self, hash: impl Into<String>) {
        if let TestDetail::Install { failed_hash, .. } = &mut self.detail {
            *failed_hash = Some(hash.into());
        }
    }

    /// Records the exit code of a server run.
    pub fn set_exit_code(&mut self, code: i32) {
        if let TestDetail::Run { exit_code, .. } = &mut self.detail {
            *exit_code = Some(code);
        }
    }

    /// Records that the server needed the legacy runtime workaround.
    pub fn needs_legacy_java_fixer(&mut self) {
        if let TestDetail::Run {
            legacy_java_fixer, ..
        } = &mut self.detail
        {
            *legacy_java_fixer = true;
            self.globals.insert(LEGACY_JAVA_FIXER.to_string());
        }
    }

    /// Records the wrong vanilla jar referenced by the server classpath.
    pub fn set_incorrect_server_jar(&mut self, jar: impl Into<String>) {
        if let TestDetail::Run {
            incorrect_server_jar,
            ..
        } = &mut self.detail
        {
            *incorrect_server_jar = Some(jar.into());
            self.globals.insert(INCORRECT_SERVER_JAR.to_string());
        }
    }

    /// Records classpath entries missing on disk.
    pub fn set_missing_dependencies(&mut self, deps: Vec<String>) {
        if let TestDetail::Run {
            missing_dependencies,
            ..
        } = &mut self.detail
        {
            *missing_dependencies = deps;
        }
    }

    /// Writes `<name>.json` and, when there is captured output,
    /// `<name>.log.gz` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ReportError> {
        let stored = StoredRef {
            version: self.version,
            success: self.success,
            message: self.message.as_deref(),
            globals: &self.globals,
            detail: &self.detail,
        };
        let json = serde_json::to_vec_pretty(&stored).map_err(|e| ReportError::Encode {
            what: self.kind.name(),
            reason: e.to_string(),
        })?;
        write_atomic(&dir.join(format!("{}.json", self.kind.name())), &json)?;

        let log_path = dir.join(format!("{}.log.gz", self.kind.name()));
        if self.log.is_empty() {
            return match fs::remove_file(&log_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(ReportError::io(&log_path, e))
                },
                _ => Ok(()),
            };
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for line in &self.log {
            writeln!(encoder, "{line}").map_err(|e| ReportError::io(&log_path, e))?;
        }
        let compressed = encoder.finish().map_err(|e| ReportError::io(&log_path, e))?;
        write_atomic(&log_path, &compressed)
    }

    /// Reads the stored result of `kind` from `dir`.
    ///
    /// Returns `Ok(None)` when nothing is stored or the stored schema version
    /// is not current. The captured log is not loaded; see
    /// [`load_log`](Self::load_log).
    pub fn load(dir: &Path, kind: TestKind) -> Result<Option<Self>, ReportError> {
        let path = dir.join(format!("{}.json", kind.name()));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReportError::io(&path, e)),
        };
        let malformed = |e: serde_json::Error| ReportError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        };

        let header: Header = serde_json::from_slice(&bytes).map_err(malformed)?;
        if header.version != kind.schema_version() {
            tracing::debug!(
                test = kind.name(),
                stored = header.version,
                current = kind.schema_version(),
                "ignoring stale test result"
            );
            return Ok(None);
        }

        let stored: Stored = serde_json::from_slice(&bytes).map_err(malformed)?;
        if kind.is_install() != matches!(stored.detail, TestDetail::Install { .. }) {
            return Err(ReportError::Malformed {
                path,
                reason: format!("detail does not match test kind {kind}"),
            });
        }
        Ok(Some(Self {
            kind,
            version: stored.version,
            success: stored.success,
            message: stored.message,
            globals: stored.globals,
            log: Vec::new(),
            detail: stored.detail,
        }))
    }

    /// Reads the captured console output of `kind` from `dir`.
    pub fn load_log(dir: &Path, kind: TestKind) -> Result<Vec<String>, ReportError> {
        let path = dir.join(format!("{}.log.gz", kind.name()));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ReportError::io(&path, e)),
        };
        BufReader::new(GzDecoder::new(file))
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| ReportError::io(&path, e))
    }
}

/// `relative` with `/` separators and `version` replaced by
/// [`VERSION_TOKEN`].
#[must_use]
pub fn canonical_path(relative: &str, version: &str) -> String {
    let normalized = relative.replace('\\', "/");
    if version.is_empty() {
        normalized
    } else {
        normalized.replace(version, VERSION_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_paths() {
        assert_eq!(
            canonical_path(r"libraries\net\minecraftforge\forge\1.20.1-47.1.0\forge-1.20.1-47.1.0.jar", "1.20.1-47.1.0"),
            "libraries/net/minecraftforge/forge/[VERSION]/forge-[VERSION].jar"
        );
        assert_eq!(canonical_path("run.sh", ""), "run.sh");
    }

    #[test]
    fn kinds_round_trip_by_name() {
        for kind in TestKind::ALL {
            assert_eq!(TestKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(TestKind::from_name("client-run"), None);
        assert_eq!(TestKind::install(Side::Server), TestKind::ServerInstall);
    }

    #[test]
    fn persists_result_and_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut result = TestResult::new(TestKind::ServerInstall);
        result.add_file("libraries/x/1.0-2.0/x-1.0-2.0.jar", "1.0-2.0");
        result.log_line("Installing");
        result.log_line("Done");
        result.fail("Exit Code 1");
        result.set_failed_hash("abc");
        result.save(dir.path()).expect("save");

        let loaded = TestResult::load(dir.path(), TestKind::ServerInstall)
            .expect("load")
            .expect("present");
        assert!(!loaded.is_success());
        assert_eq!(loaded.message(), Some("Exit Code 1"));
        assert_eq!(loaded.files(), ["libraries/x/[VERSION]/x-[VERSION].jar"]);
        assert!(loaded.log().is_empty());
        assert_eq!(
            TestResult::load_log(dir.path(), TestKind::ServerInstall).expect("log"),
            ["Installing", "Done"]
        );
    }

    #[test]
    fn stale_schema_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("server-run.json"),
            r#"{"version":0,"success":true,"globals":[],"detail":{"run":{}}}"#,
        )
        .expect("write");
        assert!(
            TestResult::load(dir.path(), TestKind::ServerRun)
                .expect("load")
                .is_none()
        );
        assert!(
            TestResult::load(dir.path(), TestKind::ClientInstall)
                .expect("load")
                .is_none()
        );
    }

    #[test]
    fn mismatched_detail_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("server-run.json"),
            r#"{"version":1,"success":true,"detail":{"install":{}}}"#,
        )
        .expect("write");
        assert!(matches!(
            TestResult::load(dir.path(), TestKind::ServerRun),
            Err(ReportError::Malformed { .. })
        ));
    }

    #[test]
    fn run_flags_raise_globals() {
        let mut result = TestResult::new(TestKind::ServerRun);
        result.needs_legacy_java_fixer();
        result.set_incorrect_server_jar("minecraft_server.1.12.2.jar");
        result.add_file("ignored", "");
        assert!(result.files().is_empty());
        assert_eq!(
            result.globals().iter().map(String::as_str).collect::<Vec<_>>(),
            [INCORRECT_SERVER_JAR, LEGACY_JAVA_FIXER]
        );
    }

    #[test]
    fn clears_log_file_when_log_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut result = TestResult::new(TestKind::ClientInstall);
        result.log_line("first");
        result.save(dir.path()).expect("save");
        assert!(dir.path().join("client-install.log.gz").exists());

        let fresh = TestResult::new(TestKind::ClientInstall);
        fresh.save(dir.path()).expect("save");
        assert!(!dir.path().join("client-install.log.gz").exists());
    }
}
