//! irtest - installer regression harness
//!
//! Downloads every published installer of an artifact, installs client and
//! server for each version, boots the server, and records the results.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use irtest_core::cache::HttpFetcher;
use irtest_core::config::HarnessConfig;
use irtest_core::orchestrator::Orchestrator;
use irtest_core::runtime::{
    DirectoryLocator, EnvLocator, NoProvisioner, RuntimeLocator, RuntimeResolver,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// irtest - installer regression harness
#[derive(Parser, Debug)]
#[command(name = "irtest")]
#[command(about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Repository publishing the installers
    #[arg(short = 'm', long = "maven")]
    repository: Option<String>,

    /// Installer coordinate (`group:name`)
    #[arg(short, long)]
    artifact: Option<String>,

    /// Working directory for installations
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Download cache directory
    #[arg(short, long)]
    cache: Option<PathBuf>,

    /// Report directory
    #[arg(short, long)]
    reports: Option<PathBuf>,

    /// Test only this version, or every `<version>-*` when it has no `-`
    #[arg(short, long, conflicts_with_all = ["start", "end"])]
    version: Option<String>,

    /// Lowest version to test (inclusive)
    #[arg(short, long)]
    start: Option<String>,

    /// Version to stop before (exclusive)
    #[arg(short, long)]
    end: Option<String>,

    /// Rerun tests even when cached results exist
    #[arg(long)]
    force: bool,

    /// Round runtime requirements up to the next LTS release
    #[arg(long)]
    lts: bool,

    /// Worker threads per stage
    #[arg(long)]
    workers: Option<usize>,

    /// How long a silent server may run before it is killed (e.g. `90s`)
    #[arg(long, value_parser = humantime::parse_duration)]
    idle_timeout: Option<Duration>,
}

impl Cli {
    /// Applies command line overrides on top of `config`.
    fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(repository) = self.repository {
            config.repository = repository;
        }
        if let Some(artifact) = self.artifact {
            config.artifact = artifact;
        }
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if let Some(cache) = self.cache {
            config.cache_dir = cache;
        }
        if let Some(reports) = self.reports {
            config.reports_dir = reports;
        }
        if self.version.is_some() {
            config.selection.only = self.version;
            config.selection.start = None;
            config.selection.end = None;
        }
        if self.start.is_some() {
            config.selection.start = self.start;
        }
        if self.end.is_some() {
            config.selection.end = self.end;
        }
        config.force |= self.force;
        config.lts |= self.lts;
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        config
    }
}

fn print_settings(config: &HarnessConfig) {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let settings = [
        ("Maven", config.repository.clone()),
        ("Artifact", config.artifact.clone()),
        ("Output", config.output_dir.display().to_string()),
        ("Cache", config.cache_dir.display().to_string()),
        ("Reports", config.reports_dir.display().to_string()),
        ("Version", optional(&config.selection.only)),
        ("Start", optional(&config.selection.start)),
        ("End", optional(&config.selection.end)),
        ("Force", config.force.to_string()),
        ("LTS", config.lts.to_string()),
        ("Workers", config.worker_count().to_string()),
        (
            "Idle timeout",
            humantime::format_duration(config.idle_timeout).to_string(),
        ),
    ];
    let width = settings.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in settings {
        println!("{key:>width$}: {value}");
    }
}

fn runtime_resolver(config: &HarnessConfig) -> RuntimeResolver {
    let mut roots = config.runtimes.search_dirs.clone();
    roots.extend(DirectoryLocator::default_roots());
    let locators: Vec<Box<dyn RuntimeLocator>> = vec![
        Box::new(EnvLocator::new()),
        Box::new(DirectoryLocator::new(roots)),
    ];
    RuntimeResolver::new(locators, Box::new(NoProvisioner))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    let config = cli.apply(config);
    config.validate().context("invalid configuration")?;
    print_settings(&config);

    let fetcher = HttpFetcher::new().context("failed to create HTTP client")?;
    let runtimes = runtime_resolver(&config);
    let orchestrator = Orchestrator::new(config, Arc::new(fetcher), runtimes)
        .context("failed to set up pipeline")?;
    let summary = orchestrator.run().context("pipeline failed")?;

    println!(
        "Tested {} of {} versions ({} installers downloaded, {} tests run)",
        summary.selected, summary.discovered, summary.downloaded, summary.executed
    );
    if !summary.failures.is_empty() {
        println!("Failures: {}", summary.failures.join(", "));
    }
    Ok(())
}
