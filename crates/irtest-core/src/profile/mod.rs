//! Installer profiles.
//!
//! Installers embed an `install_profile.json` in one of two shapes. The
//! legacy layout (`v1`) carries `install` and `versionInfo` blocks; the
//! current layout (`v2`) references a separate version descriptor inside the
//! same archive. [`InstallProfile`] sniffs the shape and exposes one interface
//! over both.

mod jar;
mod legacy;
mod modern;
mod version;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jar::{JarArchive, manifest_class_path};
pub use legacy::LegacyProfile;
pub use modern::ModernProfile;
pub use version::{
    DistributionDownload, LibraryArtifact, LibraryDownloads, RuntimeRequirement,
    VersionDescriptor, VersionLibrary,
};

use crate::coordinate::Coordinate;

/// Archive entry holding the install profile.
pub const INSTALL_PROFILE: &str = "install_profile.json";

/// The game's library repository.
pub const MOJANG_LIBRARIES: &str = "https://libraries.minecraft.net/";

/// The loader's artifact repository.
pub const FORGE_MAVEN: &str = "https://maven.minecraftforge.net/";

/// Former address of [`FORGE_MAVEN`], still referenced by old profiles.
pub const LEGACY_FORGE_MAVEN: &str = "https://files.minecraftforge.net/maven/";

/// Errors raised while reading installer archives and profiles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileError {
    /// The archive could not be read from disk.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Archive path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a readable zip archive.
    #[error("invalid archive {}: {reason}", path.display())]
    Archive {
        /// Archive path.
        path: PathBuf,
        /// Zip error.
        reason: String,
    },

    /// An archive entry is not valid JSON of the expected shape.
    #[error("malformed {entry}: {reason}")]
    Malformed {
        /// Entry name.
        entry: String,
        /// Parser error.
        reason: String,
    },

    /// An entry referenced by the profile is absent from the archive.
    #[error("archive entry {entry} is missing")]
    MissingEntry {
        /// Entry name.
        entry: String,
    },
}

/// Which installation a test targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// A game client installation.
    Client,
    /// A dedicated server installation.
    Server,
}

impl Side {
    /// Both sides, client first.
    pub const ALL: [Self; 2] = [Self::Client, Self::Server];

    /// Lower-case name, also the working directory name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    /// Installer command line flag selecting this side.
    #[must_use]
    pub const fn install_flag(self) -> &'static str {
        match self {
            Self::Client => "--installClient",
            Self::Server => "--installServer",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "Client",
            Self::Server => "Server",
        })
    }
}

/// Install profile layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileFormat {
    /// `install` + `versionInfo` layout.
    V1,
    /// Layout with an external version descriptor.
    V2,
}

impl ProfileFormat {
    /// Global flag naming versions that use this layout.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// A downloadable library needed by an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    /// Library coordinate as declared.
    pub coordinate: Coordinate,
    /// Download URL.
    pub url: String,
    /// Path under the installation's `libraries` directory.
    pub path: String,
    /// Published SHA-1, when declared.
    pub sha1: Option<String>,
}

/// A parsed install profile of either layout.
#[derive(Debug, Clone)]
pub enum InstallProfile {
    /// Legacy layout.
    Legacy(LegacyProfile),
    /// Current layout.
    Modern(ModernProfile),
}

impl InstallProfile {
    /// Reads the profile embedded in `installer`.
    ///
    /// Returns `Ok(None)` for archives without an install profile.
    pub fn read(installer: &Path) -> Result<Option<Self>, ProfileError> {
        let mut archive = JarArchive::open(installer)?;
        let Some(profile) = archive.entry(INSTALL_PROFILE)? else {
            return Ok(None);
        };
        Self::parse(&profile, |name| archive.entry(name)).map(Some)
    }

    /// Parses profile bytes, resolving embedded entries through `embedded`.
    pub fn parse(
        profile: &[u8],
        mut embedded: impl FnMut(&str) -> Result<Option<Vec<u8>>, ProfileError>,
    ) -> Result<Self, ProfileError> {
        let value: serde_json::Value =
            serde_json::from_slice(profile).map_err(|e| malformed(INSTALL_PROFILE, &e))?;

        if value.get("install").is_some() && value.get("versionInfo").is_some() {
            let legacy = serde_json::from_value(value).map_err(|e| malformed(INSTALL_PROFILE, &e))?;
            return Ok(Self::Legacy(legacy));
        }

        let raw: modern::RawProfile =
            serde_json::from_value(value).map_err(|e| malformed(INSTALL_PROFILE, &e))?;
        let descriptor = match raw.json.as_deref() {
            Some(entry) => {
                let entry = entry.trim_start_matches('/');
                let bytes = embedded(entry)?.ok_or_else(|| ProfileError::MissingEntry {
                    entry: entry.to_string(),
                })?;
                serde_json::from_slice(&bytes).map_err(|e| malformed(entry, &e))?
            },
            None => VersionDescriptor::default(),
        };
        Ok(Self::Modern(ModernProfile::new(raw, descriptor)))
    }

    /// Layout of this profile.
    #[must_use]
    pub const fn format(&self) -> ProfileFormat {
        match self {
            Self::Legacy(_) => ProfileFormat::V1,
            Self::Modern(_) => ProfileFormat::V2,
        }
    }

    /// Game version the installer targets.
    #[must_use]
    pub fn minecraft_version(&self) -> &str {
        match self {
            Self::Legacy(profile) => profile.minecraft_version(),
            Self::Modern(profile) => profile.minecraft_version(),
        }
    }

    /// File name of the server jar to launch, relative to the install root.
    ///
    /// `None` means the installation is started through its generated run
    /// script instead.
    #[must_use]
    pub fn executable_jar(&self) -> Option<String> {
        match self {
            Self::Legacy(profile) => profile.executable_jar(),
            Self::Modern(profile) => profile.executable_jar(),
        }
    }

    /// Libraries an installation of `side` needs.
    #[must_use]
    pub fn libraries(&self, side: Side) -> Vec<Library> {
        match self {
            Self::Legacy(profile) => profile.libraries(side),
            Self::Modern(profile) => profile.libraries(side),
        }
    }

    /// Where the vanilla game jar for `side` is expected, as a template with
    /// `{ROOT}`, `{LIBRARY_DIR}` and `{MINECRAFT_VERSION}` tokens.
    #[must_use]
    pub fn vanilla_jar_template(&self, side: Side) -> &str {
        const CLIENT: &str = "{ROOT}/versions/{MINECRAFT_VERSION}/{MINECRAFT_VERSION}.jar";
        const SERVER: &str = "{ROOT}/minecraft_server.{MINECRAFT_VERSION}.jar";
        match (side, self) {
            (Side::Client, _) => CLIENT,
            (Side::Server, Self::Modern(profile)) => profile.server_jar_template().unwrap_or(SERVER),
            (Side::Server, Self::Legacy(_)) => SERVER,
        }
    }

    /// The vanilla jar location for `side` inside the installation at `root`.
    #[must_use]
    pub fn vanilla_jar_path(&self, side: Side, root: &Path) -> PathBuf {
        let root_str = root.to_string_lossy();
        let libraries = root.join("libraries");
        let expanded = self
            .vanilla_jar_template(side)
            .replace("{MINECRAFT_VERSION}", self.minecraft_version())
            .replace("{LIBRARY_DIR}", &libraries.to_string_lossy())
            .replace("{ROOT}", &root_str);
        PathBuf::from(expanded)
    }
}

fn malformed(entry: &str, err: &serde_json::Error) -> ProfileError {
    ProfileError::Malformed {
        entry: entry.to_string(),
        reason: err.to_string(),
    }
}
