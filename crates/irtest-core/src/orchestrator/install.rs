//! Running an installer against a prepared directory.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::PipelineContext;
use super::dependencies::{clean_coordinate, fetch_library, runtime_for};
use crate::process::{LineAction, ProcessSpec, Supervision};
use crate::profile::{InstallProfile, ProfileFormat, Side};
use crate::report::{Report, TaskLog, TestKind, TestResult};
use crate::runtime::java_executable;

/// Launcher state the client installer insists on finding.
const LAUNCHER_PROFILES: &str = "{\n  \"profiles\": {\n  }\n}\n";

/// Installs `side` of `report` into `target` and records what it produced.
pub(super) fn run_install(
    ctx: &PipelineContext,
    report: &Report,
    profile: &InstallProfile,
    side: Side,
    target: &Path,
    log: &TaskLog,
) -> TestResult {
    let mut result = TestResult::new(TestKind::install(side));
    let version = report.coordinate().version().unwrap_or_default();
    log.info(format!("Installing {}", side.name()));
    let _indent = log.push();

    let Some(installer) = report.installer() else {
        result.fail("Installer not downloaded");
        return result;
    };
    let Some(java_home) = runtime_for(ctx, profile.minecraft_version(), log) else {
        result.fail("Failed to find Java install");
        return result;
    };
    if let Err(message) = copy_vanilla(ctx, profile, side, target) {
        log.error(message.clone());
        result.fail(message);
        return result;
    }
    if let Err(message) = copy_libraries(ctx, profile, side, target, log) {
        log.error(message.clone());
        result.fail(message);
        return result;
    }
    if side == Side::Client {
        let path = target.join("launcher_profiles.json");
        if let Err(err) = fs::write(&path, LAUNCHER_PROFILES) {
            result.fail(format!("Failed to write {}: {err}", path.display()));
            return result;
        }
    }

    let mut builder = ProcessSpec::builder()
        .name(format!("{version}-{}-install", side.name()))
        .command(java_executable(&java_home).to_string_lossy())
        .arg("-jar")
        .arg(installer.to_string_lossy())
        .arg(side.install_flag())
        .arg(target.to_string_lossy())
        .cwd(target);
    if profile.format() == ProfileFormat::V2 {
        builder = builder.arg("--mirror").arg(ctx.config.repository.as_str());
    }
    let spec = builder.build();

    result.log_line(format!("Running: {}", spec.command_line()));
    result.log_line(format!("Working dir: {}", target.display()));
    result.log_line("");

    let outcome = ctx.runner.run(&spec, Supervision::WaitForExit, |line| {
        result.log_line(line);
        LineAction::Continue
    });
    match outcome {
        Ok(outcome) if outcome.code() == 0 => result.succeed(None),
        Ok(outcome) => {
            result.fail(format!("Exit Code {}", outcome.code()));
            if let Some(hash) = report.hash() {
                result.set_failed_hash(hash);
            }
        },
        Err(err) => {
            result.fail(format!("Failed to run installer: {err}"));
            return result;
        },
    }

    for entry in WalkDir::new(target).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if let Ok(relative) = entry.path().strip_prefix(target) {
                    let relative = relative.to_string_lossy().replace('\\', "/");
                    result.add_file(&relative, version);
                }
            },
            Ok(_) => {},
            Err(err) => log.warn(format!("Failed to list installed files: {err}")),
        }
    }
    result
}

/// Places the vanilla jar where the installer expects it. Clients also get
/// the version descriptor next to it.
fn copy_vanilla(
    ctx: &PipelineContext,
    profile: &InstallProfile,
    side: Side,
    target: &Path,
) -> Result<(), String> {
    let minecraft = profile.minecraft_version();
    let source = match ctx.minecraft.download(minecraft, side.name()) {
        Ok(Some(path)) => path,
        Ok(None) => return Err(format!("Minecraft {minecraft} has no {} download", side.name())),
        Err(err) => {
            return Err(format!(
                "Failed to download Minecraft {minecraft} {}: {err}",
                side.name()
            ));
        },
    };
    copy_file(&source, &profile.vanilla_jar_path(side, target))?;

    if side == Side::Client {
        let descriptor = ctx.minecraft.descriptor_path(minecraft);
        let dest = target
            .join("versions")
            .join(minecraft)
            .join(format!("{minecraft}.json"));
        copy_file(&descriptor, &dest)?;
    }
    Ok(())
}

/// Copies every library `side` needs into `target/libraries`. Libraries
/// whose URL cannot be mapped back to a coordinate are left to the
/// installer.
fn copy_libraries(
    ctx: &PipelineContext,
    profile: &InstallProfile,
    side: Side,
    target: &Path,
    log: &TaskLog,
) -> Result<(), String> {
    let root = target.join("libraries");
    for library in profile.libraries(side) {
        if library.url.is_empty() {
            continue;
        }
        let coordinate = match clean_coordinate(&library) {
            Ok(coordinate) => coordinate,
            Err(message) => {
                log.warn(message);
                continue;
            },
        };
        let source = fetch_library(ctx, &coordinate, &library.url)
            .map_err(|reason| format!("Failed to download library {coordinate}: {reason}"))?;
        copy_file(&source, &root.join(&library.path))?;
    }
    Ok(())
}

fn copy_file(source: &Path, dest: &Path) -> Result<(), String> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
    }
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| format!("Failed to copy {} to {}: {e}", source.display(), dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_file_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a.jar");
        fs::write(&source, b"jar").expect("write");
        let dest = dir.path().join("out/libraries/x/a.jar");

        copy_file(&source, &dest).expect("copy");
        assert_eq!(fs::read(&dest).expect("read"), b"jar");
    }

    #[test]
    fn copy_file_reports_missing_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = copy_file(&dir.path().join("missing"), &dir.path().join("dest"))
            .expect_err("missing source");
        assert!(err.starts_with("Failed to copy"));
    }
}
