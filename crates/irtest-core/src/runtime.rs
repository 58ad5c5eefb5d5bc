//! Managed runtime (JDK) discovery.
//!
//! The harness needs a runtime of a specific major version for every game
//! version it tests. Discovery goes through a chain of [`RuntimeLocator`]s;
//! when none of them knows a matching install, a [`RuntimeProvisioner`] may
//! obtain one. Resolution is memoized per major version for the whole run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::report::TaskLog;
use crate::sync::{OnceMap, lock};

/// Errors raised by runtime provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// No provisioning backend is configured.
    #[error("no runtime provisioner is configured for major version {major}")]
    ProvisioningUnavailable {
        /// Requested major version.
        major: u32,
    },

    /// The provisioner tried and failed.
    #[error("failed to provision runtime {major}: {reason}")]
    ProvisioningFailed {
        /// Requested major version.
        major: u32,
        /// Why it failed.
        reason: String,
    },
}

/// A strategy for finding an installed runtime.
pub trait RuntimeLocator: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Home directory of an installed runtime with major version `major`.
    fn find(&self, major: u32) -> Option<PathBuf>;

    /// Human-readable notes on what was searched for `major`, for failure
    /// reports.
    fn diagnostics(&self, major: u32) -> Vec<String>;
}

/// A strategy for obtaining a runtime that no locator found.
pub trait RuntimeProvisioner: Send + Sync {
    /// Installs or otherwise makes available a runtime with major `major`,
    /// returning its home directory.
    fn provision(&self, major: u32) -> Result<PathBuf, RuntimeError>;
}

/// Provisioner used when the harness may only use preinstalled runtimes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProvisioner;

impl RuntimeProvisioner for NoProvisioner {
    fn provision(&self, major: u32) -> Result<PathBuf, RuntimeError> {
        Err(RuntimeError::ProvisioningUnavailable { major })
    }
}

/// Path of the launcher executable inside runtime `home`.
#[must_use]
pub fn java_executable(home: &Path) -> PathBuf {
    let name = if cfg!(windows) { "java.exe" } else { "java" };
    home.join("bin").join(name)
}

/// Rounds `major` up to the next long-term-support release.
#[must_use]
pub const fn round_to_lts(major: u32) -> u32 {
    match major {
        0..=8 => 8,
        9..=11 => 11,
        12..=17 => 17,
        18..=21 => 21,
        22..=25 => 25,
        _ => major,
    }
}

/// Major version recorded in a runtime's `release` file.
///
/// Handles both `JAVA_VERSION="1.8.0_392"` and `JAVA_VERSION="17.0.9"`.
#[must_use]
pub fn read_release_major(home: &Path) -> Option<u32> {
    let release = fs::read_to_string(home.join("release")).ok()?;
    let value = release.lines().find_map(|line| {
        line.strip_prefix("JAVA_VERSION=")
            .map(|value| value.trim().trim_matches('"'))
    })?;
    parse_major(value)
}

fn parse_major(version: &str) -> Option<u32> {
    let mut parts = version.split(['.', '_', '-', '+']);
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

fn is_runtime_home(home: &Path) -> bool {
    java_executable(home).is_file()
}

/// Search notes per requested major version.
#[derive(Debug, Default)]
struct Notes(Mutex<HashMap<u32, Vec<String>>>);

impl Notes {
    fn push(&self, major: u32, note: String) {
        lock(&self.0).entry(major).or_default().push(note);
    }

    fn get(&self, major: u32) -> Vec<String> {
        lock(&self.0).get(&major).cloned().unwrap_or_default()
    }
}

/// Finds runtimes through `JAVA_<major>_HOME`, then `JAVA_HOME`.
#[derive(Debug, Default)]
pub struct EnvLocator {
    notes: Notes,
}

impl EnvLocator {
    /// Creates the locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, variable: &str, major: u32) -> Option<PathBuf> {
        let Some(value) = std::env::var_os(variable) else {
            self.notes.push(major, format!("{variable} is not set"));
            return None;
        };
        let home = PathBuf::from(value);
        if !is_runtime_home(&home) {
            self.notes.push(
                major,
                format!("{variable}={} has no launcher executable", home.display()),
            );
            return None;
        }
        match read_release_major(&home) {
            Some(found) if found == major => Some(home),
            found => {
                self.notes.push(
                    major,
                    format!(
                        "{variable}={} is version {}",
                        home.display(),
                        found.map_or_else(|| "unknown".to_string(), |v| v.to_string())
                    ),
                );
                None
            },
        }
    }
}

impl RuntimeLocator for EnvLocator {
    fn name(&self) -> &str {
        "environment"
    }

    fn find(&self, major: u32) -> Option<PathBuf> {
        self.check(&format!("JAVA_{major}_HOME"), major)
            .or_else(|| self.check("JAVA_HOME", major))
    }

    fn diagnostics(&self, major: u32) -> Vec<String> {
        self.notes.get(major)
    }
}

/// Finds runtimes installed as subdirectories of a set of search roots, such
/// as `/usr/lib/jvm` or a toolchain download directory.
#[derive(Debug)]
pub struct DirectoryLocator {
    roots: Vec<PathBuf>,
    notes: Notes,
}

impl DirectoryLocator {
    /// Searches each directory in `roots`.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            notes: Notes::default(),
        }
    }

    /// Conventional install locations on this platform.
    #[must_use]
    pub fn default_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if cfg!(target_os = "macos") {
            roots.push(PathBuf::from("/Library/Java/JavaVirtualMachines"));
        } else if cfg!(windows) {
            roots.push(PathBuf::from("C:\\Program Files\\Java"));
            roots.push(PathBuf::from("C:\\Program Files\\Eclipse Adoptium"));
        } else {
            roots.push(PathBuf::from("/usr/lib/jvm"));
        }
        if let Some(home) = std::env::var_os("HOME") {
            let home = PathBuf::from(home);
            roots.push(home.join(".gradle").join("jdks"));
            roots.push(home.join(".sdkman").join("candidates").join("java"));
        }
        roots
    }

    fn candidates(root: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(root) else {
            return Vec::new();
        };
        let mut homes: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .flat_map(|dir| {
                // macOS bundles keep the home under Contents/Home.
                let bundled = dir.join("Contents").join("Home");
                [dir, bundled]
            })
            .filter(|home| is_runtime_home(home))
            .collect();
        homes.sort();
        homes
    }
}

impl RuntimeLocator for DirectoryLocator {
    fn name(&self) -> &str {
        "directories"
    }

    fn find(&self, major: u32) -> Option<PathBuf> {
        for root in &self.roots {
            if !root.is_dir() {
                self.notes
                    .push(major, format!("{} does not exist", root.display()));
                continue;
            }
            let candidates = Self::candidates(root);
            if let Some(home) = candidates
                .iter()
                .find(|home| read_release_major(home) == Some(major))
            {
                return Some(home.clone());
            }
            self.notes.push(
                major,
                format!(
                    "{}: {} runtime(s), none with major version {major}",
                    root.display(),
                    candidates.len()
                ),
            );
        }
        None
    }

    fn diagnostics(&self, major: u32) -> Vec<String> {
        self.notes.get(major)
    }
}

/// Memoizing front end over the locator chain and provisioner.
pub struct RuntimeResolver {
    locators: Vec<Box<dyn RuntimeLocator>>,
    provisioner: Box<dyn RuntimeProvisioner>,
    lts: bool,
    resolved: OnceMap<u32, Option<PathBuf>>,
}

impl std::fmt::Debug for RuntimeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.locators.iter().map(|l| l.name()).collect();
        f.debug_struct("RuntimeResolver")
            .field("locators", &names)
            .field("lts", &self.lts)
            .finish_non_exhaustive()
    }
}

impl RuntimeResolver {
    /// Builds a resolver trying `locators` in order, then `provisioner`.
    #[must_use]
    pub fn new(
        locators: Vec<Box<dyn RuntimeLocator>>,
        provisioner: Box<dyn RuntimeProvisioner>,
    ) -> Self {
        Self {
            locators,
            provisioner,
            lts: false,
            resolved: OnceMap::new(),
        }
    }

    /// Rounds every request up to a long-term-support release.
    #[must_use]
    pub const fn with_lts(mut self, lts: bool) -> Self {
        self.lts = lts;
        self
    }

    /// The major version actually resolved for a request of `major`.
    #[must_use]
    pub const fn effective_major(&self, major: u32) -> u32 {
        if self.lts { round_to_lts(major) } else { major }
    }

    /// Home of a runtime satisfying `major`, resolved once per run.
    ///
    /// Failures are written to `log` together with each locator's notes.
    pub fn resolve(&self, major: u32, log: &TaskLog) -> Option<PathBuf> {
        let major = self.effective_major(major);
        self.resolved
            .get_or_init(&major, || self.locate(major, log))
    }

    fn locate(&self, major: u32, log: &TaskLog) -> Option<PathBuf> {
        for locator in &self.locators {
            if let Some(home) = locator.find(major) {
                log.debug(format!(
                    "Runtime {major} found by {}: {}",
                    locator.name(),
                    home.display()
                ));
                return Some(home);
            }
        }

        match self.provisioner.provision(major) {
            Ok(home) => {
                log.info(format!("Provisioned runtime {major}: {}", home.display()));
                Some(home)
            },
            Err(err) => {
                log.error(format!("Failed to find runtime {major}: {err}"));
                let _indent = log.push();
                for locator in &self.locators {
                    for note in locator.diagnostics(major) {
                        log.error(format!("{}: {note}", locator.name()));
                    }
                }
                None
            },
        }
    }
}
