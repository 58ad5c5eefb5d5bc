//! Process spawning utilities.
//!
//! Provides functionality to spawn child processes with piped output and the
//! environment overlay of a [`ProcessSpec`].

use std::process::Stdio;

use tokio::process::{Child, Command};

use super::{ProcessError, ProcessSpec};

/// A spawned process with its child handle and PID.
pub struct SpawnedProcess {
    /// The child process handle.
    pub child: Child,
    /// The OS process ID.
    pub pid: u32,
}

/// Spawn a process according to its specification.
///
/// Stdin is closed; stdout and stderr are piped so the caller can merge
/// them. The child is killed if its handle is dropped. On Unix the child
/// leads a new process group whose id is its pid.
///
/// # Errors
///
/// Returns `ProcessError::SpawnFailed` if the process cannot be spawned,
/// or if the PID cannot be obtained.
pub fn spawn(spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
    let mut cmd = Command::new(&spec.command);

    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
        name: spec.name.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id().ok_or_else(|| ProcessError::SpawnFailed {
        name: spec.name.clone(),
        reason: "failed to get process ID".to_string(),
    })?;

    Ok(SpawnedProcess { child, pid })
}
