//! Game version descriptors (`versions/<id>/<id>.json`).

use std::collections::BTreeMap;

use serde::Deserialize;

use super::Library;
use crate::coordinate::{ComparableVersion, Coordinate};

/// The subset of a game version descriptor the harness consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionDescriptor {
    /// Version id.
    #[serde(default)]
    pub id: Option<String>,
    /// Distribution downloads keyed by `client`, `server`, ...
    #[serde(default)]
    pub downloads: BTreeMap<String, DistributionDownload>,
    /// Libraries the game needs at runtime.
    #[serde(default)]
    pub libraries: Vec<VersionLibrary>,
    /// Runtime requirement, absent on older descriptors.
    #[serde(default, rename = "javaVersion")]
    pub java_version: Option<RuntimeRequirement>,
}

/// One distribution file of a game version.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionDownload {
    /// Download URL.
    pub url: String,
    /// Published SHA-1.
    #[serde(default)]
    pub sha1: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// The `javaVersion` block of a descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeRequirement {
    /// Runtime component name.
    #[serde(default)]
    pub component: Option<String>,
    /// Required major version; zero when unspecified.
    #[serde(default, rename = "majorVersion")]
    pub major_version: u32,
}

/// A library entry as it appears in descriptors and modern install profiles.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionLibrary {
    /// Coordinate descriptor of the library.
    pub name: String,
    /// Where to obtain it.
    #[serde(default)]
    pub downloads: Option<LibraryDownloads>,
}

/// The `downloads` block of a library.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryDownloads {
    /// The main artifact.
    #[serde(default)]
    pub artifact: Option<LibraryArtifact>,
}

/// A downloadable library artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryArtifact {
    /// Path under the libraries directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Download URL; empty when the installer produces the file itself.
    #[serde(default)]
    pub url: Option<String>,
    /// Published SHA-1.
    #[serde(default)]
    pub sha1: Option<String>,
}

impl VersionLibrary {
    /// Converts to a [`Library`] if it names a downloadable artifact.
    #[must_use]
    pub fn to_library(&self) -> Option<Library> {
        let artifact = self.downloads.as_ref()?.artifact.as_ref()?;
        let url = artifact.url.as_deref().filter(|url| !url.is_empty())?;
        let coordinate = Coordinate::parse(&self.name).ok()?;
        let path = match artifact.path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => coordinate.path()?,
        };
        Some(Library {
            coordinate,
            url: url.to_string(),
            path,
            sha1: artifact.sha1.clone(),
        })
    }
}

impl VersionDescriptor {
    /// Runtime major version needed to run game version `minecraft`.
    ///
    /// Descriptors predating the `javaVersion` block fall back to the known
    /// release thresholds: 21 from 1.20.5, 17 from 1.18, 16 from 1.17, else 8.
    #[must_use]
    pub fn required_runtime(&self, minecraft: &str) -> u32 {
        match self.java_version.as_ref().map(|req| req.major_version) {
            Some(major) if major != 0 => major,
            _ => {
                let version = ComparableVersion::new(minecraft);
                if version >= ComparableVersion::new("1.20.5") {
                    21
                } else if version >= ComparableVersion::new("1.18") {
                    17
                } else if version >= ComparableVersion::new("1.17") {
                    16
                } else {
                    8
                }
            },
        }
    }

    /// Every downloadable library in the descriptor.
    #[must_use]
    pub fn downloadable_libraries(&self) -> Vec<Library> {
        self.libraries
            .iter()
            .filter_map(VersionLibrary::to_library)
            .collect()
    }
}
