//! The legacy (`v1`) install profile: `install` + `versionInfo` blocks.

use serde::Deserialize;

use super::{FORGE_MAVEN, Library, MOJANG_LIBRARIES, Side};
use crate::coordinate::Coordinate;

/// A `v1` install profile.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyProfile {
    install: Install,
    #[serde(rename = "versionInfo")]
    version_info: VersionInfo,
    #[serde(default)]
    optionals: Vec<OptionalLibrary>,
}

#[derive(Debug, Clone, Deserialize)]
struct Install {
    minecraft: String,
    #[serde(default, rename = "filePath")]
    file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    libraries: Vec<LegacyLibrary>,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyLibrary {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    serverreq: Option<bool>,
    #[serde(default)]
    clientreq: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct OptionalLibrary {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artifact: Option<String>,
    #[serde(default)]
    maven: Option<String>,
}

impl LegacyLibrary {
    fn required_for(&self, side: Side) -> bool {
        match side {
            Side::Client => self.clientreq == Some(true),
            Side::Server => self.serverreq == Some(true),
        }
    }

    /// Repository the library comes from. No URL means the game's library
    /// repository; an empty URL means the installer ships it.
    fn repository(&self) -> Option<&'static str> {
        match self.url.as_deref() {
            None => Some(MOJANG_LIBRARIES),
            Some("") => None,
            Some(_) => Some(FORGE_MAVEN),
        }
    }
}

fn library(coordinate: Coordinate, repository: &str) -> Option<Library> {
    let path = coordinate.path()?;
    let mut url = repository.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(&path);
    Some(Library {
        coordinate,
        url,
        path,
        sha1: None,
    })
}

impl LegacyProfile {
    pub(super) fn minecraft_version(&self) -> &str {
        &self.install.minecraft
    }

    pub(super) fn executable_jar(&self) -> Option<String> {
        self.install.file_path.clone().filter(|path| !path.is_empty())
    }

    pub(super) fn libraries(&self, side: Side) -> Vec<Library> {
        let required = self
            .version_info
            .libraries
            .iter()
            .filter(|lib| lib.required_for(side))
            .filter_map(|lib| {
                let repository = lib.repository()?;
                let coordinate = Coordinate::parse(&lib.name).ok()?;
                library(coordinate, repository)
            });

        let optional = self.optionals.iter().filter_map(|opt| {
            opt.name.as_ref()?;
            let coordinate = Coordinate::parse(opt.artifact.as_deref()?).ok()?;
            library(coordinate, opt.maven.as_deref()?)
        });

        required.chain(optional).collect()
    }
}
