//! Cross-version flag index.
//!
//! The index is derived, never authoritative: it is recomputed from scratch
//! over every report each run and written as one `<flag>.txt` file per flag,
//! listing versions in ascending order. Files for flags that no longer apply
//! to any version are removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use super::{Report, ReportError, write_atomic};
use crate::coordinate::ComparableVersion;

/// Raised when no installer is published.
pub const NO_INSTALLER: &str = "no_installer";

/// Raised when the profile names no server jar.
pub const NO_SERVER_JAR: &str = "no_server_jar";

/// Raised when any test failed.
pub const FAILURES: &str = "failures";

const EXTENSION: &str = "txt";

/// Flag name to the versions carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalIndex {
    flags: BTreeMap<String, BTreeSet<ComparableVersion>>,
}

impl GlobalIndex {
    /// Computes the index over `reports`.
    #[must_use]
    pub fn compute<'a>(reports: impl IntoIterator<Item = &'a Report>) -> Self {
        let mut index = Self::default();
        for report in reports {
            let version = report.version();
            if report.hash().is_none() {
                index.add(NO_INSTALLER, version);
            } else if let Some(format) = report.format() {
                index.add(format.flag(), version);
                if report.executable_jar().is_none() {
                    index.add(NO_SERVER_JAR, version);
                }
            }
            for flag in report.globals() {
                index.add(&flag, version);
            }
            for result in report.results() {
                for flag in result.globals() {
                    index.add(flag, version);
                }
            }
            if !report.is_success() {
                index.add(FAILURES, version);
            }
        }
        index
    }

    fn add(&mut self, flag: &str, version: &ComparableVersion) {
        self.flags
            .entry(flag.to_string())
            .or_default()
            .insert(version.clone());
    }

    /// Versions carrying `flag`, ascending.
    #[must_use]
    pub fn versions(&self, flag: &str) -> Vec<&str> {
        self.flags
            .get(flag)
            .map(|set| set.iter().map(ComparableVersion::as_str).collect())
            .unwrap_or_default()
    }

    /// Every flag with at least one version.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    /// Whether no flag is set on any version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Rewrites `dir` to hold exactly this index.
    pub fn save(&self, dir: &Path) -> Result<(), ReportError> {
        fs::create_dir_all(dir).map_err(|e| ReportError::io(dir, e))?;

        for entry in fs::read_dir(dir).map_err(|e| ReportError::io(dir, e))? {
            let path = entry.map_err(|e| ReportError::io(dir, e))?.path();
            let stale = path.extension().is_some_and(|ext| ext == EXTENSION)
                && path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_none_or(|flag| !self.flags.contains_key(flag));
            if stale {
                fs::remove_file(&path).map_err(|e| ReportError::io(&path, e))?;
            }
        }

        for (flag, versions) in &self.flags {
            let mut body = String::new();
            for version in versions {
                body.push_str(version.as_str());
                body.push('\n');
            }
            write_atomic(&dir.join(format!("{flag}.{EXTENSION}")), body.as_bytes())?;
        }
        Ok(())
    }

    /// Reads a previously saved index.
    pub fn load(dir: &Path) -> Result<Self, ReportError> {
        let mut index = Self::default();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(ReportError::io(dir, e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| ReportError::io(dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            let Some(flag) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(|e| ReportError::io(&path, e))?;
            let set = index.flags.entry(flag.to_string()).or_default();
            set.extend(
                text.lines()
                    .filter(|line| !line.is_empty())
                    .map(ComparableVersion::new),
            );
        }
        Ok(index)
    }
}
