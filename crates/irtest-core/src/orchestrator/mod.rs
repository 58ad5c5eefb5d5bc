//! The staged pipeline that tests every published installer.
//!
//! A run moves through fixed stages, each fanning work out over a
//! [`TaskScheduler`] and gathering it back on the calling thread:
//!
//! 1. discover versions and load their stored reports
//! 2. download installers and parse the profiles of versions needing tests
//! 3. prefetch game jars, libraries and runtimes
//! 4. install clients and servers, then boot each server
//! 5. save reports and rebuild the global flag index
//!
//! Only the calling thread writes to the log directly; tasks buffer their
//! lines in a [`TaskLog`] that is replayed once they finish.

mod dependencies;
mod download;
mod install;
mod server;

use std::any::Any;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use thiserror::Error;

use crate::cache::{CacheError, MavenCache, MinecraftCache, RemoteFetcher};
use crate::classify::ClassifierSet;
use crate::config::{ConfigError, HarnessConfig};
use crate::coordinate::Coordinate;
use crate::process::ProcessRunner;
use crate::profile::{ProfileFormat, Side};
use crate::progress::Progress;
use crate::report::{GlobalIndex, Report, ReportError, ReportStore, TaskLog, TestKind, TestResult};
use crate::runtime::RuntimeResolver;
use crate::scheduler::{SchedulerError, TaskScheduler};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The version listing could not be fetched.
    #[error("failed to list versions of {coordinate}: {source}")]
    Discovery {
        /// Artifact being listed.
        coordinate: String,
        /// Underlying cache error.
        #[source]
        source: CacheError,
    },

    /// The repository lists no versions.
    #[error("no versions of {coordinate} are published")]
    NoVersions {
        /// Artifact being listed.
        coordinate: String,
    },

    /// A worker pool could not be started.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The global index could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Versions the repository lists.
    pub discovered: usize,
    /// Versions the selection admitted.
    pub selected: usize,
    /// Installers fetched from the network this run.
    pub downloaded: usize,
    /// Install and run tests executed this run.
    pub executed: usize,
    /// Reports carried into the index without being touched.
    pub carried: usize,
    /// Selected versions with at least one failed test.
    pub failures: Vec<String>,
}

/// Hands out server ports, one per boot, starting over at the base port
/// after the last one.
#[derive(Debug)]
struct PortAllocator {
    base: u16,
    next: AtomicU16,
}

impl PortAllocator {
    const fn new(base: u16) -> Self {
        Self {
            base,
            next: AtomicU16::new(base),
        }
    }

    fn next(&self) -> u16 {
        let advance = |port: u16| Some(port.checked_add(1).unwrap_or(self.base));
        match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance) {
            Ok(port) | Err(port) => port,
        }
    }
}

/// Everything stage tasks share.
pub(crate) struct PipelineContext {
    config: HarnessConfig,
    coordinate: Coordinate,
    workers: usize,
    maven: MavenCache,
    minecraft: MinecraftCache,
    runtimes: RuntimeResolver,
    runner: ProcessRunner,
    classifiers: ClassifierSet,
    store: ReportStore,
    ports: PortAllocator,
}

/// Drives the staged pipeline over one configuration.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("artifact", &self.ctx.coordinate)
            .field("workers", &self.ctx.workers)
            .finish_non_exhaustive()
    }
}

/// A side test handed to the scheduler.
struct SideJob {
    report: Arc<Report>,
    side: Side,
    install: bool,
    run: bool,
}

/// What came back from a side test.
struct SideOutcome {
    report: Arc<Report>,
    side: Side,
    log: TaskLog,
    executed: usize,
}

impl Orchestrator {
    /// Builds the pipeline's caches and stores from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(
        config: HarnessConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        runtimes: RuntimeResolver,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let coordinate = config.coordinate()?;
        let classifiers = config.classifier_set()?;
        let maven = MavenCache::new(
            "maven",
            &config.repository,
            &config.cache_dir,
            Arc::clone(&fetcher),
            config.ttl,
        );
        let minecraft = MinecraftCache::new(
            &config.cache_dir,
            config.mirrors.launcher_manifest.clone(),
            &config.mirrors.libraries,
            fetcher,
            config.ttl,
        );

        Ok(Self {
            ctx: Arc::new(PipelineContext {
                workers: config.worker_count(),
                coordinate,
                maven,
                minecraft,
                runtimes: runtimes.with_lts(config.lts),
                runner: ProcessRunner::new(),
                classifiers,
                store: ReportStore::new(config.reports_dir.clone()),
                ports: PortAllocator::new(config.base_port),
                config,
            }),
        })
    }

    /// Runs every stage once.
    ///
    /// # Errors
    ///
    /// Returns an error if versions cannot be discovered, a worker pool
    /// cannot start, or the global index cannot be written. Failures of
    /// individual versions end up in their reports instead.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let ctx = &self.ctx;
        let versions = download::discover(ctx)?;
        let reports = download::load_reports(ctx, &versions);

        let (selected, mut carried): (Vec<_>, Vec<_>) = reports
            .into_iter()
            .partition(|report| ctx.config.selection.matches(report.version().as_str()));
        tracing::info!(
            discovered = versions.len(),
            selected = selected.len(),
            "versions selected"
        );
        let selected_count = selected.len();

        let (tested, failed, downloaded) = download::download_installers(ctx, selected)?;
        dependencies::prefetch(ctx, &tested)?;
        let executed = test_sides(ctx, &tested)?;
        clean_output(&ctx.config.output_dir, &tested);

        for report in &tested {
            if let Err(err) = report.save() {
                tracing::error!(version = %report.version(), error = %err, "failed to save report");
            }
        }
        let failures = tested
            .iter()
            .filter(|report| report.hash().is_some() && !report.is_success())
            .map(|report| report.version().to_string())
            .collect();

        carried.extend(failed);
        let index = GlobalIndex::compute(tested.iter().chain(&carried).map(|report| &**report));
        index.save(&ctx.store.global_dir())?;
        tracing::info!(flags = index.flags().count(), "global index written");

        Ok(RunSummary {
            discovered: versions.len(),
            selected: selected_count,
            downloaded,
            executed,
            carried: carried.len(),
            failures,
        })
    }
}

/// Runs the client and server tests of every report that needs them.
fn test_sides(ctx: &Arc<PipelineContext>, reports: &[Arc<Report>]) -> Result<usize, PipelineError> {
    let mut jobs = Vec::new();
    for report in reports {
        let Some(profile) = report.profile() else {
            continue;
        };
        for side in Side::ALL {
            if side == Side::Client && profile.format() == ProfileFormat::V1 {
                let mut result = TestResult::new(TestKind::ClientInstall);
                result.succeed(Some("Installing client on format v1 is not supported".to_string()));
                report.attach(result);
                continue;
            }
            let install = ctx.config.force || !report.is_cached(TestKind::install(side));
            let run = side == Side::Server
                && (ctx.config.force || !report.is_cached(TestKind::ServerRun));
            if install || run {
                jobs.push(SideJob {
                    report: Arc::clone(report),
                    side,
                    install,
                    run,
                });
            }
        }
    }

    tracing::info!(count = jobs.len(), "running tests");
    let mut scheduler = TaskScheduler::new("tests", ctx.workers)?;
    for job in jobs {
        let ctx = Arc::clone(ctx);
        scheduler.submit(move || run_side(&ctx, job))?;
    }

    let mut progress = Progress::new(scheduler.outstanding());
    let mut executed = 0;
    scheduler.consume(|completion| {
        let outcome = match completion {
            Ok(outcome) => outcome,
            Err(failure) => {
                progress.step(&format!("Test task failed: {failure}"));
                return;
            },
        };
        executed += outcome.executed;
        let version = outcome.report.version().to_string();
        let install = outcome.report.result(TestKind::install(outcome.side));
        let mut line = format!("{version} {}", outcome.side.name());
        if let Some(result) = &install {
            line.push_str(&status("Install", result));
        }
        if outcome.side == Side::Server {
            if let Some(result) = outcome.report.result(TestKind::ServerRun) {
                line.push_str(&status("Run", &result));
            }
        }
        progress.step(&line);
        outcome.log.replay(1);
        if let Err(err) = outcome.report.save() {
            tracing::error!(version = %version, error = %err, "failed to save report");
        }
    });
    Ok(executed)
}

fn status(what: &str, result: &TestResult) -> String {
    match (result.is_success(), result.message()) {
        (true, _) => format!(" | {what} Success"),
        (false, Some(message)) => format!(" | {what} Failed: {message}"),
        (false, None) => format!(" | {what} Failed"),
    }
}

/// Installs one side and, for servers, boots it. A panic becomes a failed
/// result on the report.
fn run_side(ctx: &PipelineContext, job: SideJob) -> SideOutcome {
    let log = TaskLog::new();
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| test_side(ctx, &job, &log)));
    let executed = attempt.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log.error(format!("Test crashed: {message}"));
        let mut result = TestResult::new(TestKind::install(job.side));
        result.fail(format!("Test crashed: {message}"));
        job.report.attach(result);
        0
    });
    SideOutcome {
        report: job.report,
        side: job.side,
        log,
        executed,
    }
}

/// Text of a caught panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn test_side(ctx: &PipelineContext, job: &SideJob, log: &TaskLog) -> usize {
    let report = &job.report;
    let Some(profile) = report.profile() else {
        return 0;
    };
    let version_dir = ctx.config.output_dir.join(report.version().as_str());
    let target = match std::path::absolute(version_dir.join(job.side.name())) {
        Ok(target) => target,
        Err(err) => {
            let mut result = TestResult::new(TestKind::install(job.side));
            result.fail(format!("Failed to resolve output directory: {err}"));
            report.attach(result);
            return 0;
        },
    };
    if target.exists() {
        if let Err(err) = fs::remove_dir_all(&target) {
            log.warn(format!("Failed to clear {}: {err}", target.display()));
        }
    }
    if let Err(err) = fs::create_dir_all(&target) {
        let mut result = TestResult::new(TestKind::install(job.side));
        result.fail(format!("Failed to create {}: {err}", target.display()));
        report.attach(result);
        return 0;
    }

    let installed = install::run_install(ctx, report, &profile, job.side, &target, log);
    let mut executed = 1;
    let succeeded = installed.is_success();
    if job.install {
        report.attach(installed);
    }
    if !succeeded {
        return executed;
    }

    if job.run {
        let port = ctx.ports.next();
        let ran = server::run_server(ctx, &profile, &target, port, log);
        executed += 1;
        let succeeded = ran.is_success();
        report.attach(ran);
        if !succeeded {
            return executed;
        }
    }

    if let Err(err) = fs::remove_dir_all(&target) {
        log.warn(format!("Failed to remove {}: {err}", target.display()));
    }
    remove_if_empty(&version_dir);
    executed
}

/// Removes `dir` when nothing is left in it.
fn remove_if_empty(dir: &Path) {
    if let Err(err) = remove_empty_dir(dir) {
        tracing::debug!(path = %dir.display(), error = %err, "failed to remove output directory");
    }
}

/// `Ok(false)` when `dir` is missing or still has entries.
fn remove_empty_dir(dir: &Path) -> io::Result<bool> {
    match fs::remove_dir(dir) {
        Ok(()) => Ok(true),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(false)
        },
        Err(err) => Err(err),
    }
}

fn clean_output(output: &Path, reports: &[Arc<Report>]) {
    let dirs: Vec<PathBuf> = reports
        .iter()
        .map(|report| output.join(report.version().as_str()))
        .collect();
    for dir in &dirs {
        remove_if_empty(dir);
    }
    remove_if_empty(output);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_unique_and_sequential() {
        let ports = PortAllocator::new(25566);
        assert_eq!(ports.next(), 25566);
        assert_eq!(ports.next(), 25567);
        assert_eq!(ports.next(), 25568);
    }

    #[test]
    fn ports_start_over_at_base_after_the_last() {
        let ports = PortAllocator::new(65534);
        assert_eq!(ports.next(), 65534);
        assert_eq!(ports.next(), 65535);
        assert_eq!(ports.next(), 65534);
        assert_eq!(ports.next(), 65535);
    }

    #[test]
    fn status_includes_failure_message() {
        let mut result = TestResult::new(TestKind::ServerRun);
        result.fail("Timed out");
        assert_eq!(status("Run", &result), " | Run Failed: Timed out");
        result.succeed(None);
        assert_eq!(status("Run", &result), " | Run Success");
    }

    #[test]
    fn only_empty_directories_are_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("1.0");
        let full = dir.path().join("2.0");
        fs::create_dir_all(&empty).expect("mkdir");
        fs::create_dir_all(full.join("server")).expect("mkdir");

        remove_if_empty(&empty);
        remove_if_empty(&full);
        assert!(!empty.exists());
        assert!(full.exists());
    }

    #[test]
    fn missing_or_occupied_directories_are_not_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let full = dir.path().join("2.0");
        fs::create_dir_all(full.join("client")).expect("mkdir");
        let file = dir.path().join("stray.log");
        fs::write(&file, b"log").expect("write");

        assert!(!remove_empty_dir(&dir.path().join("missing")).expect("missing"));
        assert!(!remove_empty_dir(&full).expect("occupied"));
        assert!(remove_empty_dir(&full.join("client")).expect("empty"));
        assert!(remove_empty_dir(&file).is_err());
        assert!(file.exists());
    }
}
