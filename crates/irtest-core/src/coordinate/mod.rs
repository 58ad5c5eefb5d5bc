//! Repository artifact coordinates.
//!
//! A [`Coordinate`] names an artifact in a Maven-layout repository using the
//! `group:name[:version[:classifier]][@extension]` descriptor syntax. The
//! layout helpers ([`Coordinate::folder`], [`Coordinate::path`],
//! [`Coordinate::file_name`]) map a coordinate onto the repository's
//! directory structure.
//!
//! Coordinates order by group, name, classifier and extension, then by
//! [`ComparableVersion`], so a sorted list of one artifact's versions is in
//! release order.

mod version;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
pub use version::ComparableVersion;

/// Extension assumed when a descriptor carries no `@extension` suffix.
pub const DEFAULT_EXTENSION: &str = "jar";

/// Errors produced while parsing a coordinate descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CoordinateError {
    /// The descriptor does not follow `group:name[:version[:classifier]]`.
    #[error("invalid coordinate '{descriptor}': {reason}")]
    Invalid {
        /// The rejected descriptor.
        descriptor: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// A `group:name[:version[:classifier]][@extension]` artifact coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    group: String,
    name: String,
    version: Option<String>,
    classifier: Option<String>,
    extension: String,
}

impl Coordinate {
    /// Creates an unversioned coordinate for `group:name`.
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: None,
            classifier: None,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Parses a descriptor string.
    pub fn parse(descriptor: &str) -> Result<Self, CoordinateError> {
        descriptor.parse()
    }

    /// The group identifier, e.g. `net.minecraftforge`.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The artifact name, e.g. `forge`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version, if the coordinate is versioned.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The classifier, if any.
    #[must_use]
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    /// The file extension (defaults to `jar`).
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The version wrapped for release-order comparison.
    #[must_use]
    pub fn comparable_version(&self) -> Option<ComparableVersion> {
        self.version.as_deref().map(ComparableVersion::new)
    }

    /// Returns a copy of this coordinate with `version` set.
    #[must_use]
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..self.clone()
        }
    }

    /// Returns a copy of this coordinate with `classifier` replaced.
    #[must_use]
    pub fn with_classifier(&self, classifier: Option<&str>) -> Self {
        Self {
            classifier: classifier.map(str::to_string),
            ..self.clone()
        }
    }

    /// Returns a copy of this coordinate with `extension` replaced.
    #[must_use]
    pub fn with_extension(&self, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..self.clone()
        }
    }

    /// Directory holding every version of this artifact: `group/as/path/name`.
    #[must_use]
    pub fn module_folder(&self) -> String {
        format!("{}/{}", self.group.replace('.', "/"), self.name)
    }

    /// Directory holding this version: `group/as/path/name/version`.
    ///
    /// Unversioned coordinates map to [`Coordinate::module_folder`].
    #[must_use]
    pub fn folder(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{version}", self.module_folder()),
            None => self.module_folder(),
        }
    }

    /// File name: `name-version[-classifier].extension`.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let version = self.version.as_deref()?;
        let mut out = format!("{}-{version}", self.name);
        if let Some(classifier) = &self.classifier {
            out.push('-');
            out.push_str(classifier);
        }
        out.push('.');
        out.push_str(&self.extension);
        Some(out)
    }

    /// Repository-relative path: `folder/file_name`.
    #[must_use]
    pub fn path(&self) -> Option<String> {
        self.file_name()
            .map(|file| format!("{}/{file}", self.folder()))
    }

    /// Identity ignoring the version, used for ordering.
    fn identity(&self) -> (&str, &str, Option<&str>, &str) {
        (
            &self.group,
            &self.name,
            self.classifier.as_deref(),
            &self.extension,
        )
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| CoordinateError::Invalid {
            descriptor: descriptor.to_string(),
            reason,
        };

        let (body, extension) = match descriptor.rsplit_once('@') {
            Some((body, extension)) => (body, Some(extension)),
            None => (descriptor, None),
        };
        if extension.is_some_and(str::is_empty) {
            return Err(invalid("empty extension"));
        }

        let parts: Vec<&str> = body.split(':').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(invalid("expected group:name[:version[:classifier]]"));
        }
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(invalid("empty segment"));
        }

        Ok(Self {
            group: parts[0].to_string(),
            name: parts[1].to_string(),
            version: parts.get(2).map(|v| (*v).to_string()),
            classifier: parts.get(3).map(|c| (*c).to_string()),
            extension: extension.unwrap_or(DEFAULT_EXTENSION).to_string(),
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
            if let Some(classifier) = &self.classifier {
                write!(f, ":{classifier}")?;
            }
            if self.extension != DEFAULT_EXTENSION {
                write!(f, "@{}", self.extension)?;
            }
        }
        Ok(())
    }
}

impl Ord for Coordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity()
            .cmp(&other.identity())
            .then_with(|| self.comparable_version().cmp(&other.comparable_version()))
    }
}

impl PartialOrd for Coordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let descriptor = String::deserialize(deserializer)?;
        descriptor.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let coord = Coordinate::parse("net.minecraftforge:forge:1.20.1-47.1.0:installer@zip")
            .expect("parse");
        assert_eq!(coord.group(), "net.minecraftforge");
        assert_eq!(coord.name(), "forge");
        assert_eq!(coord.version(), Some("1.20.1-47.1.0"));
        assert_eq!(coord.classifier(), Some("installer"));
        assert_eq!(coord.extension(), "zip");
        assert_eq!(
            coord.path().as_deref(),
            Some("net/minecraftforge/forge/1.20.1-47.1.0/forge-1.20.1-47.1.0-installer.zip")
        );
    }

    #[test]
    fn unversioned_coordinate_has_no_path() {
        let coord = Coordinate::parse("net.minecraftforge:forge").expect("parse");
        assert_eq!(coord.version(), None);
        assert_eq!(coord.path(), None);
        assert_eq!(coord.folder(), "net/minecraftforge/forge");
        assert_eq!(coord.to_string(), "net.minecraftforge:forge");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for bad in ["forge", "a:b:c:d:e", "a::c", "a:b:1@", ""] {
            assert!(Coordinate::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn display_round_trips_descriptor() {
        for descriptor in ["a:b:1.0", "a:b:1.0:natives-linux", "a:b:1.0@zip", "a:b:1.0:c@txt"] {
            let coord = Coordinate::parse(descriptor).expect("parse");
            assert_eq!(coord.to_string(), descriptor);
        }
    }

    #[test]
    fn orders_versions_by_release_order() {
        let mut coords: Vec<Coordinate> = ["a:b:1.10", "a:b:1.2", "a:b:1.2-rc1", "a:b:1.9.4"]
            .iter()
            .map(|d| Coordinate::parse(d).expect("parse"))
            .collect();
        coords.sort();
        let versions: Vec<_> = coords.iter().filter_map(Coordinate::version).collect();
        assert_eq!(versions, ["1.2-rc1", "1.2", "1.9.4", "1.10"]);
    }

    #[test]
    fn identity_orders_before_version() {
        let a = Coordinate::parse("a:b:9.0").expect("parse");
        let b = Coordinate::parse("a:c:1.0").expect("parse");
        assert!(a < b);
    }

    #[test]
    fn serde_uses_descriptor_string() {
        let coord = Coordinate::parse("a:b:1.0:sources").expect("parse");
        let json = serde_json::to_string(&coord).expect("serialize");
        assert_eq!(json, "\"a:b:1.0:sources\"");
        let back: Coordinate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, coord);
    }
}
