//! Booting an installed server until it reports it is ready.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::PipelineContext;
use super::dependencies::runtime_for;
use crate::process::{LineAction, ProcessOutcome, ProcessSpec, Supervision};
use crate::profile::{InstallProfile, manifest_class_path};
use crate::report::{TaskLog, TestKind, TestResult};
use crate::runtime::java_executable;

/// Printed by servers that start listening before they finish loading.
const LISTENING_MARKER: &str = "Starting Minecraft server on";

/// Printed when the server jar's class path is broken.
const MISSING_MAIN_CLASS: &str =
    "Could not find or load main class net.minecraft.server.MinecraftServer";

/// Whether `line` shows the server finished starting.
pub(super) fn is_ready(line: &str) -> bool {
    line.contains(LISTENING_MARKER) || (line.contains("Done") && line.contains("\"help\""))
}

/// Boots the server installed in `target` on `port`.
pub(super) fn run_server(
    ctx: &PipelineContext,
    profile: &InstallProfile,
    target: &Path,
    port: u16,
    log: &TaskLog,
) -> TestResult {
    let mut result = TestResult::new(TestKind::ServerRun);
    log.info("Running server");
    let _indent = log.push();

    if let Err(message) = write_server_files(target, port) {
        result.fail(message);
        return result;
    }
    let Some(java_home) = runtime_for(ctx, profile.minecraft_version(), log) else {
        result.fail("Failed to find Java install");
        return result;
    };

    let server_jar = profile.executable_jar();
    let mut builder = ProcessSpec::builder()
        .name(format!("{}-server-run", target.display()))
        .cwd(target)
        .env("JAVA_HOME", java_home.to_string_lossy());
    builder = match &server_jar {
        Some(jar) => builder
            .command(java_executable(&java_home).to_string_lossy())
            .args(["-jar", jar.as_str(), "nogui"]),
        None if cfg!(windows) => builder.command("cmd").args(["/c", "run.bat", "nogui"]),
        None => builder.command("sh").args(["run.sh", "nogui"]),
    };
    if let Some(path) = search_path(&java_home) {
        builder = builder.env("PATH", path);
    }
    let spec = builder.build();

    result.log_line(format!("Running: {}", spec.command_line()));
    result.log_line(format!("Working dir: {}", target.display()));
    result.log_line("");

    let mut started = false;
    let outcome = ctx.runner.run(
        &spec,
        Supervision::IdleTimeout(ctx.config.idle_timeout),
        |line| {
            result.log_line(line);
            if is_ready(line) {
                started = true;
                LineAction::Terminate
            } else {
                LineAction::Continue
            }
        },
    );
    match outcome {
        Ok(outcome) => {
            result.set_exit_code(outcome.code());
            if started {
                result.succeed(None);
            } else if outcome == ProcessOutcome::TimedOut {
                result.fail("Timed out");
            } else if outcome.code() != 0 {
                result.fail(format!("Exit code {}", outcome.code()));
            } else {
                result.succeed(None);
            }
        },
        Err(err) => {
            result.fail(format!("Failed to start server: {err}"));
            return result;
        },
    }

    for flag in ctx.classifiers.classify(&mut result) {
        log.info(format!("Matched {flag}"));
    }
    if let Some(jar) = &server_jar {
        if result.log().iter().any(|line| line.contains(MISSING_MAIN_CLASS)) {
            check_class_path(&target.join(jar), target, &mut result, log);
        }
    }
    result
}

fn write_server_files(target: &Path, port: u16) -> Result<(), String> {
    let files = [
        ("eula.txt", "eula=true\n".to_string()),
        ("server.properties", format!("server-port={port}\n")),
    ];
    for (name, content) in files {
        let path = target.join(name);
        fs::write(&path, content).map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    }
    Ok(())
}

/// `PATH` with the runtime's `bin` directory first.
fn search_path(java_home: &Path) -> Option<String> {
    let mut paths = vec![java_home.join("bin")];
    if let Some(current) = env::var_os("PATH") {
        paths.extend(env::split_paths(&current));
    }
    env::join_paths(paths)
        .ok()
        .map(|joined| joined.to_string_lossy().into_owned())
}

/// Flags class path entries of `jar` that are missing from `root`.
fn check_class_path(jar: &Path, root: &Path, result: &mut TestResult, log: &TaskLog) {
    let entries = match manifest_class_path(jar) {
        Ok(entries) => entries,
        Err(err) => {
            log.warn(format!("Failed to read class path of {}: {err}", jar.display()));
            return;
        },
    };

    let missing: Vec<String> = entries
        .into_iter()
        .filter(|dep| !root.join(PathBuf::from(dep)).exists())
        .collect();
    if let Some(dep) = missing.iter().find(|dep| dep.contains("minecraft_server")) {
        log.info(format!("Incorrect server jar: {dep}"));
        result.set_incorrect_server_jar(dep.clone());
    }
    if !missing.is_empty() {
        result.fail(format!("Missing dependencies: {}", missing.join(", ")));
        result.set_missing_dependencies(missing);
    }
}
