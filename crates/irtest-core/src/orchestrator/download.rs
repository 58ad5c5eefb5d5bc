//! Discovery, report loading and installer download stages.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{PipelineContext, PipelineError, panic_message};
use crate::coordinate::{ComparableVersion, Coordinate};
use crate::hash::sha1_file;
use crate::profile::{InstallProfile, Side};
use crate::progress::Progress;
use crate::report::{Report, TestKind, TestResult};
use crate::scheduler::TaskScheduler;

/// Oldest Forge release that shipped an installer.
const FIRST_FORGE_INSTALLER: &str = "1.5.2";

/// Result of fetching one installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Download {
    /// Installer present; `fetched` is set when it came from the network.
    Ready {
        /// Whether the file was not cached before this run.
        fetched: bool,
    },
    /// No installer is published.
    Missing,
    /// The installer could not be fetched; the stored report is kept as is.
    Failed,
}

/// Lists every published version, ascending.
pub(super) fn discover(ctx: &PipelineContext) -> Result<Vec<String>, PipelineError> {
    tracing::info!(artifact = %ctx.coordinate, "discovering versions");
    let listed = ctx
        .maven
        .versions(&ctx.coordinate)
        .map_err(|source| PipelineError::Discovery {
            coordinate: ctx.coordinate.to_string(),
            source,
        })?;

    let mut versions: Vec<ComparableVersion> = listed
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ComparableVersion::new)
        .collect();
    versions.sort();
    versions.dedup();

    if versions.is_empty() {
        return Err(PipelineError::NoVersions {
            coordinate: ctx.coordinate.to_string(),
        });
    }
    Ok(versions.iter().map(|v| v.as_str().to_string()).collect())
}

/// Loads the stored report of every version, creating empty ones as needed.
pub(super) fn load_reports(ctx: &PipelineContext, versions: &[String]) -> Vec<Arc<Report>> {
    tracing::info!(count = versions.len(), "loading previous reports");
    let mut progress = Progress::new(versions.len());
    versions
        .iter()
        .map(|version| {
            progress.quiet(&format!("Loading {version}"));
            let report = ctx
                .store
                .load_or_create(&ctx.coordinate.with_version(version.as_str()));
            report.log().replay(1);
            Arc::new(report)
        })
        .collect()
}

/// Downloads the installer of every report and parses profiles where tests
/// will run. Reports whose download failed are returned separately.
pub(super) fn download_installers(
    ctx: &Arc<PipelineContext>,
    reports: Vec<Arc<Report>>,
) -> Result<(Vec<Arc<Report>>, Vec<Arc<Report>>, usize), PipelineError> {
    tracing::info!(count = reports.len(), "downloading installers");
    let mut scheduler = TaskScheduler::new("download-installers", ctx.workers)?;
    for report in reports {
        let ctx = Arc::clone(ctx);
        scheduler.submit(move || {
            let outcome = guarded(&report, || download_installer(&ctx, &report));
            (report, outcome)
        })?;
    }

    let mut progress = Progress::new(scheduler.outstanding());
    let mut ready = Vec::new();
    let mut failed = Vec::new();
    let mut fetched_count = 0;
    scheduler.consume(|completion| {
        let (report, outcome) = match completion {
            Ok(done) => done,
            Err(failure) => {
                tracing::error!(error = %failure, "installer download task failed");
                return;
            },
        };
        let version = report.coordinate().version().unwrap_or_default().to_string();
        match outcome {
            Download::Ready { fetched: true } => {
                fetched_count += 1;
                progress.step(&format!("Downloaded {version}"));
            },
            Download::Ready { fetched: false } => {
                progress.quiet(&format!("Loaded {version}"));
            },
            Download::Missing => {
                progress.quiet(&format!("No installer for {version}"));
            },
            Download::Failed => {
                progress.step(&format!("Failed to download {version}"));
            },
        }
        report.log().replay(1);
        if outcome == Download::Failed {
            failed.push(report);
        } else {
            ready.push(report);
        }
    });

    for report in &ready {
        if report.hash().is_some() {
            if let Err(err) = report.save() {
                tracing::error!(version = %report.version(), error = %err, "failed to save report");
            }
        }
    }
    sort(&mut ready);
    sort(&mut failed);
    Ok((ready, failed, fetched_count))
}

fn sort(reports: &mut [Arc<Report>]) {
    reports.sort_by(|a, b| a.version().cmp(b.version()));
}

fn predates_installers(coordinate: &Coordinate) -> bool {
    coordinate.group() == "net.minecraftforge"
        && coordinate.name() == "forge"
        && coordinate
            .comparable_version()
            .is_some_and(|v| v < ComparableVersion::new(FIRST_FORGE_INSTALLER))
}

/// Runs `download`, turning a panic into a failed download on `report`.
fn guarded(report: &Report, download: impl FnOnce() -> Download) -> Download {
    panic::catch_unwind(AssertUnwindSafe(download)).unwrap_or_else(|payload| {
        report
            .log()
            .error(format!("Installer download crashed: {}", panic_message(payload.as_ref())));
        Download::Failed
    })
}

fn download_installer(ctx: &PipelineContext, report: &Report) -> Download {
    let installer = report.coordinate().with_classifier(Some("installer"));
    let log = report.log();

    if predates_installers(&installer) {
        report.mark_missing();
        return Download::Missing;
    }

    let existed = ctx.maven.exists(&installer);
    let path = match ctx.maven.download(&installer) {
        Ok(Some(path)) => path,
        Ok(None) => {
            log.debug(format!("No installer published for {installer}"));
            report.mark_missing();
            return Download::Missing;
        },
        Err(err) => {
            log.warn(format!("Failed to download installer, skipping: {err}"));
            return Download::Failed;
        },
    };

    let hash = match sha1_file(&path) {
        Ok(hash) => hash,
        Err(err) => {
            log.error(format!("Failed to hash {}: {err}", path.display()));
            return Download::Failed;
        },
    };
    if report.observe_hash(&hash) {
        log.debug(format!("Installer hash is now {hash}"));
    }
    report.set_installer(path.clone());

    if !ctx.config.force && report.is_fully_cached() {
        return Download::Ready { fetched: !existed };
    }

    let failure = match InstallProfile::read(&path) {
        Ok(Some(profile)) => {
            report.set_profile(Arc::new(profile));
            None
        },
        Ok(None) => Some("Installer has no install profile".to_string()),
        Err(err) => Some(format!("Failed to read install profile: {err}")),
    };
    if let Some(message) = failure {
        log.error(message.clone());
        for side in Side::ALL {
            let mut result = TestResult::new(TestKind::install(side));
            result.fail(message.clone());
            result.set_failed_hash(hash.clone());
            report.attach(result);
        }
    }
    Download::Ready { fetched: !existed }
}
