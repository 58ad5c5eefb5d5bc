//! Process tree discovery and signalling.
//!
//! Descendants are discovered by scanning `/proc/*/status` for `PPid` and
//! walking the resulting parent map breadth-first. Children lead their own
//! process group, so members that were reparented away from the tree are
//! still found through their `pgrp`. On platforms without a procfs only the
//! root process is visible, but the whole group can still be signalled.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Maximum bytes read from a single `/proc` file.
const MAX_PROC_READ_SIZE: u64 = 4096;

/// Signal strength used when terminating a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask politely (`SIGTERM`).
    Terminate,
    /// Force (`SIGKILL`).
    Kill,
}

/// Every live descendant of any pid in `roots`, plus the roots themselves.
#[must_use]
pub fn snapshot(roots: &BTreeSet<u32>) -> BTreeSet<u32> {
    snapshot_from_proc(roots, Path::new("/proc"))
}

/// [`snapshot`] with a configurable procfs root.
#[must_use]
pub fn snapshot_from_proc(roots: &BTreeSet<u32>, proc_root: &Path) -> BTreeSet<u32> {
    let parents = parent_map(proc_root);
    let mut seen: BTreeSet<u32> = roots.clone();
    let mut queue: VecDeque<u32> = roots.iter().copied().collect();

    while let Some(current) = queue.pop_front() {
        if let Some(children) = parents.get(&current) {
            for &child in children {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }
    seen
}

/// Every live process in group `pgid`.
#[must_use]
pub fn group_members(pgid: u32) -> BTreeSet<u32> {
    group_members_from_proc(pgid, Path::new("/proc"))
}

/// [`group_members`] with a configurable procfs root.
#[must_use]
pub fn group_members_from_proc(pgid: u32, proc_root: &Path) -> BTreeSet<u32> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u32>().ok())
        .filter(|&pid| proc_group(pid, proc_root) == Some(pgid))
        .collect()
}

/// Builds a parent -> children map from `/proc/<pid>/status`.
fn parent_map(proc_root: &Path) -> BTreeMap<u32, Vec<u32>> {
    let mut map: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let Ok(entries) = fs::read_dir(proc_root) else {
        return map;
    };
    for entry in entries.filter_map(Result::ok) {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        if let Some(ppid) = read_ppid(&entry.path().join("status")) {
            map.entry(ppid).or_default().push(pid);
        }
    }
    map
}

fn read_bounded(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut content = String::new();
    file.take(MAX_PROC_READ_SIZE)
        .read_to_string(&mut content)
        .ok()?;
    Some(content)
}

fn read_ppid(status: &Path) -> Option<u32> {
    read_bounded(status)?
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Process state letter from `/proc/<pid>/stat` (`R`, `S`, `Z`, ...).
fn proc_state(pid: u32, proc_root: &Path) -> Option<char> {
    let stat = read_bounded(&proc_root.join(pid.to_string()).join("stat"))?;
    // The command name may contain spaces and parentheses; the state follows
    // the last closing parenthesis.
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Process group from `/proc/<pid>/stat`: the third field after the name.
fn proc_group(pid: u32, proc_root: &Path) -> Option<u32> {
    let stat = read_bounded(&proc_root.join(pid.to_string()).join("stat"))?;
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(2)?.parse().ok()
}

/// Whether `pid` is still running. Zombies count as gone.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        if let Some(state) = proc_state(pid, Path::new("/proc")) {
            return state != 'Z' && state != 'X';
        }
        return false;
    }
    signal_reaches(pid)
}

#[cfg(unix)]
fn signal_reaches(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
}

#[cfg(not(unix))]
fn signal_reaches(_pid: u32) -> bool {
    false
}

/// Sends `signal` to `pid`, ignoring processes that already exited.
#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) {
    use nix::sys::signal::{Signal as NixSignal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    if let Err(err) = kill(Pid::from_raw(raw), signal) {
        tracing::trace!(pid, error = %err, "signal not delivered");
    }
}

/// Sends `signal` to every member of process group `pgid`.
#[cfg(unix)]
pub fn send_group(pgid: u32, signal: Signal) {
    use nix::sys::signal::{Signal as NixSignal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    let signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    if let Err(err) = killpg(Pid::from_raw(raw), signal) {
        tracing::trace!(pgid, error = %err, "group signal not delivered");
    }
}

/// Sends `signal` to process group `pgid`; a no-op without POSIX signals.
#[cfg(not(unix))]
pub fn send_group(_pgid: u32, _signal: Signal) {}

/// Sends `signal` to `pid`. Without POSIX signals only the direct child can
/// be stopped, through its handle.
#[cfg(not(unix))]
pub fn send(_pid: u32, _signal: Signal) {}
