//! Read access to jar (zip) archives.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use super::ProfileError;

const MANIFEST: &str = "META-INF/MANIFEST.MF";

/// An open jar archive.
pub struct JarArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl std::fmt::Debug for JarArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JarArchive")
            .field("path", &self.path)
            .field("entries", &self.archive.len())
            .finish()
    }
}

impl JarArchive {
    /// Opens the archive at `path`.
    pub fn open(path: &Path) -> Result<Self, ProfileError> {
        let file = File::open(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let archive = ZipArchive::new(file).map_err(|e| ProfileError::Archive {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Reads entry `name`, or `None` if the archive has no such entry.
    pub fn entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ProfileError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(ProfileError::Archive {
                    path: self.path.clone(),
                    reason: format!("{name}: {e}"),
                });
            },
        };
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ProfileError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(bytes))
    }
}

/// The `Class-Path` entries of a jar's manifest, empty when absent.
pub fn manifest_class_path(jar: &Path) -> Result<Vec<String>, ProfileError> {
    let mut archive = JarArchive::open(jar)?;
    let Some(manifest) = archive.entry(MANIFEST)? else {
        return Ok(Vec::new());
    };
    let text = String::from_utf8_lossy(&manifest);
    Ok(main_attribute(&text, "Class-Path")
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default())
}

/// Looks up `name` in the main section of a manifest, joining continuation
/// lines (lines that start with a single space).
fn main_attribute(manifest: &str, name: &str) -> Option<String> {
    let mut current: Option<(String, String)> = None;
    let mut found = None;

    for line in manifest.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(continuation) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(continuation);
            }
            continue;
        }
        if let Some((key, value)) = current.take() {
            if key.eq_ignore_ascii_case(name) {
                found = Some(value);
            }
        }
        current = line
            .split_once(':')
            .map(|(key, value)| (key.trim().to_string(), value.trim_start().to_string()));
    }
    if let Some((key, value)) = current {
        if key.eq_ignore_ascii_case(name) {
            found = Some(value);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_jar(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).expect("create");
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default())
                .expect("start");
            zip.write_all(body.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
    }

    #[test]
    fn joins_continuation_lines() {
        let manifest = "Manifest-Version: 1.0\r\nClass-Path: libraries/a.jar libr\r\n aries/b.jar\r\nMain-Class: x.Y\r\n\r\nName: other\r\nClass-Path: ignored.jar\r\n";
        assert_eq!(
            main_attribute(manifest, "Class-Path").as_deref(),
            Some("libraries/a.jar libraries/b.jar")
        );
        assert_eq!(main_attribute(manifest, "Main-Class").as_deref(), Some("x.Y"));
        assert_eq!(main_attribute(manifest, "Missing"), None);
    }

    #[test]
    fn reads_class_path_from_jar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = dir.path().join("server.jar");
        write_jar(
            &jar,
            &[(MANIFEST, "Manifest-Version: 1.0\nClass-Path: minecraft_server.1.12.2.jar libraries/x.jar\n")],
        );
        assert_eq!(
            manifest_class_path(&jar).expect("read"),
            ["minecraft_server.1.12.2.jar", "libraries/x.jar"]
        );
    }

    #[test]
    fn missing_entries_are_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = dir.path().join("empty.jar");
        write_jar(&jar, &[("a.txt", "a")]);
        let mut archive = JarArchive::open(&jar).expect("open");
        assert_eq!(archive.entry("a.txt").expect("read"), Some(b"a".to_vec()));
        assert_eq!(archive.entry("b.txt").expect("read"), None);
        assert!(manifest_class_path(&jar).expect("read").is_empty());
    }

    #[test]
    fn non_zip_is_an_archive_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = dir.path().join("bad.jar");
        std::fs::write(&jar, b"not a zip").expect("write");
        assert!(matches!(
            JarArchive::open(&jar),
            Err(ProfileError::Archive { .. })
        ));
    }
}
