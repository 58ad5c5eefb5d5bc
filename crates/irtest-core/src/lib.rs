//! # irtest-core
//!
//! Regression harness for game mod-loader installers.
//!
//! Every version an artifact repository publishes is downloaded, installed
//! as a client and as a dedicated server, and the server is booted until it
//! reports it is ready. Results are stored per version so later runs only
//! retest versions whose installer changed, and flags across all versions
//! are indexed into plain-text lists.
//!
//! ## Layout
//!
//! - [`coordinate`]: artifact coordinates and version ordering
//! - [`cache`]: local mirrors of the artifact repository and the game's
//!   distribution metadata
//! - [`profile`]: the install profile embedded in each installer
//! - [`runtime`]: locating a runtime for each game version
//! - [`process`]: supervised child processes with tree termination
//! - [`report`]: persisted results and the global flag index
//! - [`classify`]: log classifiers attaching flags to results
//! - [`scheduler`]: fixed-width worker pools with ordered fan-in
//! - [`orchestrator`]: the staged pipeline tying it together
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use irtest_core::cache::HttpFetcher;
//! use irtest_core::config::HarnessConfig;
//! use irtest_core::orchestrator::Orchestrator;
//! use irtest_core::runtime::{EnvLocator, NoProvisioner, RuntimeResolver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::default();
//! let runtimes = RuntimeResolver::new(vec![Box::new(EnvLocator::new())], Box::new(NoProvisioner));
//! let orchestrator = Orchestrator::new(config, Arc::new(HttpFetcher::new()?), runtimes)?;
//! let summary = orchestrator.run()?;
//! println!("{} versions failed", summary.failures.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinate;
pub mod hash;
pub mod orchestrator;
pub mod process;
pub mod profile;
pub mod progress;
pub mod report;
pub mod runtime;
pub mod scheduler;

mod sync;

pub use config::HarnessConfig;
pub use coordinate::{ComparableVersion, Coordinate};
pub use orchestrator::{Orchestrator, PipelineError, RunSummary};
pub use report::{GlobalIndex, Report, ReportStore, TestKind, TestResult};
