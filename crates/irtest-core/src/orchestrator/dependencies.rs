//! Library, game distribution and runtime prefetching.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::{PipelineContext, PipelineError};
use crate::coordinate::Coordinate;
use crate::profile::{Library, Side};
use crate::progress::Progress;
use crate::report::{Report, TaskLog};
use crate::scheduler::TaskScheduler;

/// Distribution downloads every tested game version needs.
const DISTRIBUTIONS: [&str; 2] = ["client", "server"];

/// Where a library's declared URL points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LibrarySource {
    /// The game's library repository, with the installer repository as
    /// fallback.
    Distribution,
    /// The installer repository, under its current or legacy address.
    Repository,
}

/// Classifies `url` against the known repositories.
pub(super) fn library_source(ctx: &PipelineContext, url: &str) -> Option<LibrarySource> {
    if url.starts_with(ctx.minecraft.libraries().url()) {
        Some(LibrarySource::Distribution)
    } else if url.starts_with(ctx.maven.url())
        || url.starts_with(ctx.config.library_repository())
    {
        Some(LibrarySource::Repository)
    } else {
        None
    }
}

/// Recovers the real coordinate of a library whose URL disagrees with its
/// declared name, using the URL's version folder and file name.
pub(super) fn clean_coordinate(library: &Library) -> Result<Coordinate, String> {
    let declared = &library.coordinate;
    if declared
        .path()
        .is_some_and(|path| library.url.ends_with(&path))
    {
        return Ok(declared.clone());
    }

    let mut segments = library.url.rsplit('/');
    let (Some(file), Some(version)) = (segments.next(), segments.next()) else {
        return Err(format!("Library URL {} has no version folder", library.url));
    };
    let prefix = format!("{}-{version}", declared.name());
    let Some(rest) = file.strip_prefix(&prefix) else {
        return Err(format!(
            "Library {declared} does not match its URL {}",
            library.url
        ));
    };
    let Some((qualifier, extension)) = rest.rsplit_once('.') else {
        return Err(format!("Library URL {} has no extension", library.url));
    };
    let classifier = qualifier.strip_prefix('-').filter(|c| !c.is_empty());

    Ok(Coordinate::new(declared.group(), declared.name())
        .with_version(version)
        .with_classifier(classifier)
        .with_extension(extension))
}

/// Downloads `coordinate` from the cache its `url` belongs to.
pub(super) fn fetch_library(
    ctx: &PipelineContext,
    coordinate: &Coordinate,
    url: &str,
) -> Result<PathBuf, String> {
    match library_source(ctx, url) {
        Some(LibrarySource::Distribution) => {
            match ctx.minecraft.libraries().download(coordinate) {
                Ok(Some(path)) => return Ok(path),
                Ok(None) => {},
                Err(err) => tracing::debug!(%coordinate, error = %err, "game library fetch failed"),
            }
            from_repository(ctx, coordinate)
        },
        Some(LibrarySource::Repository) => from_repository(ctx, coordinate),
        None => Err(format!("Unknown repository for {coordinate}: {url}")),
    }
}

fn from_repository(ctx: &PipelineContext, coordinate: &Coordinate) -> Result<PathBuf, String> {
    match ctx.maven.download(coordinate) {
        Ok(Some(path)) => Ok(path),
        Ok(None) => Err(format!("Library {coordinate} not found")),
        Err(err) => Err(format!("Failed to download {coordinate}: {err}")),
    }
}

/// Home of the runtime game version `minecraft` needs.
pub(super) fn runtime_for(ctx: &PipelineContext, minecraft: &str, log: &TaskLog) -> Option<PathBuf> {
    let descriptor = match ctx.minecraft.version_descriptor(minecraft) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            log.error(format!("Failed to read version descriptor for {minecraft}: {err}"));
            return None;
        },
    };
    ctx.runtimes
        .resolve(descriptor.required_runtime(minecraft), log)
}

/// Prefetches everything the install and run tests of `reports` use.
///
/// Failures are logged and left for the owning test to report.
pub(super) fn prefetch(ctx: &Arc<PipelineContext>, reports: &[Arc<Report>]) -> Result<(), PipelineError> {
    let mut games = BTreeSet::new();
    let mut libraries: BTreeMap<Coordinate, String> = BTreeMap::new();
    for report in reports {
        let Some(profile) = report.profile() else {
            continue;
        };
        games.insert(profile.minecraft_version().to_string());
        for side in Side::ALL {
            for library in profile.libraries(side) {
                if library.url.is_empty() {
                    continue;
                }
                match clean_coordinate(&library) {
                    Ok(coordinate) => {
                        libraries.entry(coordinate).or_insert(library.url);
                    },
                    Err(message) => report.log().warn(message),
                }
            }
        }
        report.log().replay(1);
    }

    tracing::info!(
        games = games.len(),
        libraries = libraries.len(),
        "downloading dependencies"
    );
    let mut scheduler = TaskScheduler::new("dependencies", ctx.workers)?;
    for game in &games {
        for key in DISTRIBUTIONS {
            let ctx = Arc::clone(ctx);
            let game = game.clone();
            scheduler.submit(move || match ctx.minecraft.download(&game, key) {
                Ok(Some(_)) => Ok(format!("Minecraft {game} {key}")),
                Ok(None) => Err(format!("Minecraft {game} has no {key} download")),
                Err(err) => Err(format!("Failed to download Minecraft {game} {key}: {err}")),
            })?;
        }
    }
    for (coordinate, url) in libraries {
        if library_source(ctx, &url).is_none() {
            tracing::warn!(%coordinate, url, "unknown repository");
            continue;
        }
        let ctx = Arc::clone(ctx);
        scheduler.submit(move || {
            fetch_library(&ctx, &coordinate, &url).map(|_| format!("Library {coordinate}"))
        })?;
    }

    let mut progress = Progress::new(scheduler.outstanding());
    scheduler.consume(|completion| match completion {
        Ok(Ok(message)) => {
            progress.quiet(&message);
        },
        Ok(Err(message)) => {
            progress.step(&message);
        },
        Err(failure) => {
            progress.step(&format!("Dependency task failed: {failure}"));
        },
    });

    tracing::info!(games = games.len(), "resolving runtimes");
    let mut scheduler = TaskScheduler::new("runtimes", ctx.workers)?;
    for game in games {
        let ctx = Arc::clone(ctx);
        scheduler.submit(move || {
            let log = TaskLog::new();
            let home = runtime_for(&ctx, &game, &log);
            (game, home, log)
        })?;
    }
    let mut progress = Progress::new(scheduler.outstanding());
    scheduler.consume(|completion| match completion {
        Ok((game, Some(home), log)) => {
            progress.step(&format!("Java for {game}: {}", home.display()));
            log.replay(1);
        },
        Ok((game, None, log)) => {
            progress.step(&format!("No Java found for {game}"));
            log.replay(1);
        },
        Err(failure) => {
            progress.step(&format!("Runtime task failed: {failure}"));
        },
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(name: &str, url: &str) -> Library {
        let coordinate = Coordinate::parse(name).expect("coordinate");
        Library {
            path: coordinate.path().expect("versioned"),
            coordinate,
            url: url.to_string(),
            sha1: None,
        }
    }

    #[test]
    fn matching_url_keeps_declared_coordinate() {
        let lib = library(
            "org.ow2.asm:asm:9.5",
            "https://maven.example/org/ow2/asm/asm/9.5/asm-9.5.jar",
        );
        assert_eq!(clean_coordinate(&lib), Ok(lib.coordinate.clone()));
    }

    #[test]
    fn mismatched_url_supplies_version_and_classifier() {
        let lib = library(
            "net.minecraftforge:forge:1.12.2",
            "https://maven.example/net/minecraftforge/forge/1.12.2-14.23.5.2847/forge-1.12.2-14.23.5.2847-universal.jar",
        );
        let cleaned = clean_coordinate(&lib).expect("cleaned");
        assert_eq!(cleaned.version(), Some("1.12.2-14.23.5.2847"));
        assert_eq!(cleaned.classifier(), Some("universal"));
        assert_eq!(cleaned.extension(), "jar");
    }

    #[test]
    fn mismatched_url_without_classifier() {
        let lib = library(
            "com.example:lib:1.0",
            "https://maven.example/com/example/lib/1.1/lib-1.1.zip",
        );
        let cleaned = clean_coordinate(&lib).expect("cleaned");
        assert_eq!(cleaned.version(), Some("1.1"));
        assert_eq!(cleaned.classifier(), None);
        assert_eq!(cleaned.extension(), "zip");
    }

    #[test]
    fn foreign_file_name_is_rejected() {
        let lib = library(
            "com.example:lib:1.0",
            "https://maven.example/com/example/lib/1.1/other-1.1.jar",
        );
        assert!(clean_coordinate(&lib).is_err());
    }
}
