//! The current (`v2`) install profile with an embedded version descriptor.

use serde::Deserialize;

use super::version::{VersionDescriptor, VersionLibrary};
use super::{Library, Side};
use crate::coordinate::Coordinate;

/// A `v2` install profile together with the descriptor it embeds.
#[derive(Debug, Clone)]
pub struct ModernProfile {
    raw: RawProfile,
    descriptor: VersionDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct RawProfile {
    minecraft: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "serverJarPath")]
    server_jar_path: Option<String>,
    #[serde(default)]
    pub(super) json: Option<String>,
    #[serde(default)]
    libraries: Option<Vec<VersionLibrary>>,
    #[serde(default)]
    processors: Option<Vec<Processor>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Processor {
    #[serde(default)]
    classpath: Vec<String>,
}

impl ModernProfile {
    pub(super) const fn new(raw: RawProfile, descriptor: VersionDescriptor) -> Self {
        Self { raw, descriptor }
    }

    pub(super) fn minecraft_version(&self) -> &str {
        &self.raw.minecraft
    }

    /// The embedded game-facing descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &VersionDescriptor {
        &self.descriptor
    }

    pub(super) fn server_jar_template(&self) -> Option<&str> {
        self.raw.server_jar_path.as_deref()
    }

    /// File name of the launchable jar derived from the profile's `path`
    /// coordinate.
    pub(super) fn executable_jar(&self) -> Option<String> {
        Coordinate::parse(self.raw.path.as_deref()?)
            .ok()?
            .file_name()
    }

    /// Descriptor libraries, plus the profile's own libraries when the
    /// profile runs processors that need them on a classpath.
    pub(super) fn libraries(&self, _side: Side) -> Vec<Library> {
        let mut libraries = self.descriptor.downloadable_libraries();

        let needs_processor_libraries = self
            .raw
            .processors
            .as_ref()
            .is_some_and(|processors| processors.iter().any(|p| !p.classpath.is_empty()));
        if needs_processor_libraries {
            if let Some(profile_libraries) = &self.raw.libraries {
                libraries.extend(profile_libraries.iter().filter_map(VersionLibrary::to_library));
            }
        }
        libraries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(processors: &str) -> ModernProfile {
        let raw: RawProfile = serde_json::from_str(&format!(
            r#"{{
                "spec": 1,
                "minecraft": "1.20.1",
                "path": "net.minecraftforge:forge:1.20.1-47.1.0:shim",
                "serverJarPath": "{{LIBRARY_DIR}}/net/minecraft/server/{{MINECRAFT_VERSION}}/server-{{MINECRAFT_VERSION}}.jar",
                "json": "/version.json",
                "libraries": [
                    {{"name":"net.minecraftforge:installertools:1.3.0","downloads":{{"artifact":{{"path":"net/minecraftforge/installertools/1.3.0/installertools-1.3.0.jar","url":"https://maven.minecraftforge.net/net/minecraftforge/installertools/1.3.0/installertools-1.3.0.jar"}}}}}}
                ],
                "processors": {processors}
            }}"#
        ))
        .expect("profile");
        let descriptor: VersionDescriptor = serde_json::from_str(
            r#"{"libraries":[{"name":"org.ow2.asm:asm:9.5","downloads":{"artifact":{"path":"org/ow2/asm/asm/9.5/asm-9.5.jar","url":"https://maven.minecraftforge.net/org/ow2/asm/asm/9.5/asm-9.5.jar"}}}]}"#,
        )
        .expect("descriptor");
        ModernProfile::new(raw, descriptor)
    }

    #[test]
    fn derives_executable_jar_from_path() {
        let profile = profile("[]");
        assert_eq!(
            profile.executable_jar().as_deref(),
            Some("forge-1.20.1-47.1.0-shim.jar")
        );
        assert!(profile.server_jar_template().is_some());
    }

    #[test]
    fn includes_profile_libraries_only_for_processors() {
        let without = profile("[]").libraries(Side::Server);
        assert_eq!(without.len(), 1);

        let with = profile(r#"[{"jar":"a:b:1","classpath":["a:c:1"]}]"#).libraries(Side::Server);
        let names: Vec<_> = with.iter().map(|l| l.coordinate.to_string()).collect();
        assert_eq!(
            names,
            ["org.ow2.asm:asm:9.5", "net.minecraftforge:installertools:1.3.0"]
        );
    }
}
