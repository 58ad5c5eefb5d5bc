//! External process supervision.
//!
//! [`ProcessRunner::run`] spawns a [`ProcessSpec`], merges stderr into stdout
//! and hands each output line to a callback while the process runs. Two
//! supervision modes exist:
//!
//! - [`Supervision::WaitForExit`] waits for a natural exit.
//! - [`Supervision::IdleTimeout`] kills the process once it has been silent
//!   for the given interval and reports [`ProcessOutcome::TimedOut`].
//!
//! Termination always covers the whole process tree: the tree is
//! snapshotted, every live member is signalled, and the cycle repeats until
//! nothing is left, escalating to `SIGKILL` after a few polite rounds.
//!
//! The runner is blocking. Each call drives its own single-threaded tokio
//! runtime, so it can be used from plain worker threads.

mod spawner;
pub mod tree;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};

pub use spawner::{SpawnedProcess, spawn};

use self::tree::Signal;

/// Exit code reported for a process killed by the idle timeout. Outside the
/// range of real exit codes.
pub const TIMED_OUT_EXIT_CODE: i32 = -12345;

/// Errors raised while running a process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessError {
    /// The process could not be started.
    #[error("failed to spawn {name}: {reason}")]
    SpawnFailed {
        /// Process name.
        name: String,
        /// Underlying error.
        reason: String,
    },

    /// Waiting on the process failed.
    #[error("failed to wait for {name}: {reason}")]
    WaitFailed {
        /// Process name.
        name: String,
        /// Underlying error.
        reason: String,
    },

    /// The supervising runtime could not be created.
    #[error("failed to build process runtime: {0}")]
    Runtime(String),
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Name used in diagnostics.
    pub name: String,
    /// Program to execute.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Environment variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ProcessSpecBuilder {
        ProcessSpecBuilder::default()
    }

    /// The command and arguments joined by spaces, for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builder for [`ProcessSpec`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ProcessSpecBuilder {
    spec: ProcessSpec,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            name: "process".to_string(),
            command: String::new(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ProcessSpecBuilder {
    /// Sets the diagnostic name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    /// Sets the program.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.spec.command = command.into();
        self
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.spec.cwd = Some(cwd.into());
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.push((key.into(), value.into()));
        self
    }

    /// Finishes the spec.
    #[must_use]
    pub fn build(self) -> ProcessSpec {
        self.spec
    }
}

/// How a run is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    /// Wait for the process to exit on its own.
    WaitForExit,
    /// Kill the process tree after this long without output.
    IdleTimeout(Duration),
}

/// What the line callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    /// Keep running.
    Continue,
    /// Terminate the process tree now.
    Terminate,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The callback asked for termination; the code observed afterwards.
    Terminated(i32),
    /// The idle timeout fired.
    TimedOut,
}

impl ProcessOutcome {
    /// The exit code, or [`TIMED_OUT_EXIT_CODE`].
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) | Self::Terminated(code) => code,
            Self::TimedOut => TIMED_OUT_EXIT_CODE,
        }
    }
}

/// Why the supervisor stopped the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Requested,
    TimedOut,
}

/// Runs processes to completion under supervision.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// How long to keep reading output after the direct child exits.
    drain_grace: Duration,
    /// Polite termination rounds before escalating to a hard kill.
    polite_rounds: usize,
    /// Upper bound on termination rounds.
    max_rounds: usize,
    /// How long each round waits for the tree to disappear.
    round_wait: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            drain_grace: Duration::from_secs(2),
            polite_rounds: 3,
            max_rounds: 10,
            round_wait: Duration::from_secs(1),
        }
    }
}

impl ProcessRunner {
    /// A runner with default termination settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `spec`, feeding every output line to `on_line`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or waited on. Exit
    /// codes and timeouts are outcomes, not errors.
    pub fn run<F>(
        &self,
        spec: &ProcessSpec,
        supervision: Supervision,
        on_line: F,
    ) -> Result<ProcessOutcome, ProcessError>
    where
        F: FnMut(&str) -> LineAction,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProcessError::Runtime(e.to_string()))?;
        runtime.block_on(self.supervise(spec, supervision, on_line))
    }

    async fn supervise<F>(
        &self,
        spec: &ProcessSpec,
        supervision: Supervision,
        mut on_line: F,
    ) -> Result<ProcessOutcome, ProcessError>
    where
        F: FnMut(&str) -> LineAction,
    {
        let SpawnedProcess { mut child, pid } = spawn(spec)?;
        tracing::debug!(name = %spec.name, pid, command = %spec.command_line(), "spawned");

        let (tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let idle = match supervision {
            Supervision::WaitForExit => None,
            Supervision::IdleTimeout(interval) => Some(interval),
        };
        let mut deadline = idle.map(|interval| Instant::now() + interval);
        let mut status: Option<ExitStatus> = None;
        let mut stream_open = true;
        let mut stop: Option<Stop> = None;
        let mut seen = BTreeSet::from([pid]);

        while status.is_none() || stream_open {
            let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                line = lines.recv(), if stream_open => match line {
                    Some(line) => {
                        if let (Some(interval), None) = (idle, status) {
                            deadline = Some(Instant::now() + interval);
                        }
                        if stop.is_none() && on_line(&line) == LineAction::Terminate {
                            stop = Some(Stop::Requested);
                            self.terminate_tree(&mut child, pid, &mut seen).await;
                        }
                    },
                    None => stream_open = false,
                },
                result = child.wait(), if status.is_none() => {
                    let exit = result.map_err(|e| ProcessError::WaitFailed {
                        name: spec.name.clone(),
                        reason: e.to_string(),
                    })?;
                    status = Some(exit);
                    // Orphaned descendants may keep the pipes open.
                    deadline = Some(Instant::now() + self.drain_grace);
                },
                () = sleep_until(wake), if deadline.is_some() => {
                    if status.is_some() {
                        tracing::debug!(name = %spec.name, "output still open after exit, cleaning up");
                        self.terminate_tree(&mut child, pid, &mut seen).await;
                        break;
                    }
                    tracing::debug!(name = %spec.name, pid, "idle timeout, terminating");
                    stop = Some(Stop::TimedOut);
                    deadline = None;
                    self.terminate_tree(&mut child, pid, &mut seen).await;
                },
            }
        }

        let code = status.map_or(TIMED_OUT_EXIT_CODE, exit_code);
        Ok(match stop {
            None => ProcessOutcome::Exited(code),
            Some(Stop::Requested) => ProcessOutcome::Terminated(code),
            Some(Stop::TimedOut) => ProcessOutcome::TimedOut,
        })
    }

    /// Signals every live member of the tree rooted at `child` until none
    /// remain. Members are the root's descendants plus its process group
    /// `pid`, so orphans reparented after the root exited are still found.
    /// `seen` accumulates members across calls.
    async fn terminate_tree(&self, child: &mut Child, pid: u32, seen: &mut BTreeSet<u32>) {
        for round in 0..self.max_rounds {
            let members = tree::snapshot(seen);
            seen.extend(members);
            seen.extend(tree::group_members(pid));
            let _ = child.try_wait();
            let alive: Vec<u32> = seen.iter().copied().filter(|&p| tree::is_alive(p)).collect();
            if alive.is_empty() {
                return;
            }

            let signal = if round < self.polite_rounds {
                Signal::Terminate
            } else {
                Signal::Kill
            };
            tracing::trace!(round, ?signal, members = alive.len(), "signalling process tree");
            tree::send_group(pid, signal);
            for &member in &alive {
                tree::send(member, signal);
            }
            if signal == Signal::Kill || cfg!(not(unix)) {
                let _ = child.start_kill();
            }

            let until = Instant::now() + self.round_wait;
            while Instant::now() < until {
                sleep(Duration::from_millis(25)).await;
                let _ = child.try_wait();
                if alive.iter().all(|&p| !tree::is_alive(p)) {
                    break;
                }
            }
        }
        tracing::warn!(members = ?seen, "process tree survived termination");
    }
}

/// Forwards lines from `reader` until it closes.
async fn pump<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            },
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant as StdInstant;

    use super::*;

    fn shell(script: &str) -> ProcessSpec {
        ProcessSpec::builder()
            .name("test-shell")
            .command("sh")
            .args(["-c", script])
            .build()
    }

    fn collect(spec: &ProcessSpec, supervision: Supervision) -> (ProcessOutcome, Vec<String>) {
        let mut lines = Vec::new();
        let outcome = ProcessRunner::new()
            .run(spec, supervision, |line| {
                lines.push(line.to_string());
                LineAction::Continue
            })
            .expect("run");
        (outcome, lines)
    }

    #[test]
    fn builder_and_command_line() {
        let spec = ProcessSpec::builder()
            .name("java")
            .command("java")
            .arg("-jar")
            .args(["installer.jar", "--installServer"])
            .env("JAVA_HOME", "/opt/jdk")
            .build();
        assert_eq!(spec.command_line(), "java -jar installer.jar --installServer");
        assert_eq!(spec.env, [("JAVA_HOME".to_string(), "/opt/jdk".to_string())]);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn reports_real_exit_code() {
        let (outcome, _) = collect(&shell("exit 3"), Supervision::WaitForExit);
        assert_eq!(outcome, ProcessOutcome::Exited(3));
        assert_eq!(outcome.code(), 3);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn merges_stderr_into_stdout() {
        let (outcome, mut lines) = collect(
            &shell("echo out; echo err 1>&2; printf 'no newline'"),
            Supervision::WaitForExit,
        );
        assert_eq!(outcome, ProcessOutcome::Exited(0));
        lines.sort();
        assert_eq!(lines, ["err", "no newline", "out"]);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn idle_timeout_yields_sentinel() {
        let started = StdInstant::now();
        let (outcome, lines) = collect(
            &shell("echo start; sleep 30"),
            Supervision::IdleTimeout(Duration::from_millis(300)),
        );
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert_eq!(outcome.code(), TIMED_OUT_EXIT_CODE);
        assert_ne!(outcome.code(), ProcessOutcome::Exited(1).code());
        assert_eq!(lines, ["start"]);
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn steady_output_keeps_process_alive() {
        let (outcome, lines) = collect(
            &shell("for i in 1 2 3 4 5; do echo $i; sleep 0.1; done"),
            Supervision::IdleTimeout(Duration::from_millis(400)),
        );
        assert_eq!(outcome, ProcessOutcome::Exited(0));
        assert_eq!(lines.len(), 5);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn callback_can_terminate() {
        let started = StdInstant::now();
        let outcome = ProcessRunner::new()
            .run(
                &shell("echo ready; sleep 30"),
                Supervision::IdleTimeout(Duration::from_secs(60)),
                |line| {
                    if line == "ready" {
                        LineAction::Terminate
                    } else {
                        LineAction::Continue
                    }
                },
            )
            .expect("run");
        assert!(matches!(outcome, ProcessOutcome::Terminated(_)));
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[cfg(target_os = "linux")]
    #[cfg_attr(miri, ignore)]
    #[test]
    fn timeout_kills_descendants() {
        let mut grandchild = None;
        let outcome = ProcessRunner::new()
            .run(
                &shell("sleep 30 & echo $!; wait"),
                Supervision::IdleTimeout(Duration::from_millis(300)),
                |line| {
                    grandchild = line.trim().parse::<u32>().ok();
                    LineAction::Continue
                },
            )
            .expect("run");
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        let grandchild = grandchild.expect("grandchild pid");
        assert!(!tree::is_alive(grandchild));
    }

    #[cfg(target_os = "linux")]
    #[cfg_attr(miri, ignore)]
    #[test]
    fn exited_root_does_not_leave_orphans_running() {
        let started = StdInstant::now();
        let mut orphan = None;
        let outcome = ProcessRunner::new()
            .run(
                &shell("sleep 30 & echo $!"),
                Supervision::WaitForExit,
                |line| {
                    orphan = line.trim().parse::<u32>().ok();
                    LineAction::Continue
                },
            )
            .expect("run");
        assert_eq!(outcome, ProcessOutcome::Exited(0));
        let orphan = orphan.expect("orphan pid");
        assert!(!tree::is_alive(orphan));
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn spawn_failure_is_an_error() {
        let spec = ProcessSpec::builder()
            .name("missing")
            .command("nonexistent_command_12345")
            .build();
        let result = ProcessRunner::new().run(&spec, Supervision::WaitForExit, |_| LineAction::Continue);
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
    }
}
