//! Per-task log buffers.
//!
//! Worker tasks write to a [`TaskLog`] instead of the process-wide subscriber
//! so their output can be replayed as one block when the driving thread
//! drains the task, rather than interleaving with other workers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::lock;

/// Severity of a buffered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Detail useful when diagnosing the harness itself.
    Debug,
    /// Normal progress.
    Info,
    /// Something went wrong for this version only.
    Warn,
    /// A failure worth attention.
    Error,
}

/// One buffered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,
    /// Nesting depth at the time the line was written.
    pub depth: usize,
    /// Message text.
    pub message: String,
}

/// A thread-safe, append-only line buffer with nesting.
#[derive(Debug, Default)]
pub struct TaskLog {
    lines: Mutex<Vec<LogLine>>,
    depth: AtomicUsize,
}

/// Restores the previous nesting depth when dropped.
#[must_use = "the indent is removed when the guard is dropped"]
#[derive(Debug)]
pub struct Indent<'a> {
    log: &'a TaskLog,
}

impl Drop for Indent<'_> {
    fn drop(&mut self) {
        self.log.depth.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TaskLog {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line at the current depth.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let line = LogLine {
            level,
            depth: self.depth.load(Ordering::Relaxed),
            message: message.into(),
        };
        lock(&self.lines).push(line);
    }

    /// Appends a debug line.
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    /// Appends an info line.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Appends a warning line.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Appends an error line.
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Nests subsequent lines one level deeper until the guard drops.
    pub fn push(&self) -> Indent<'_> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        Indent { log: self }
    }

    /// Removes and returns every buffered line.
    pub fn take(&self) -> Vec<LogLine> {
        std::mem::take(&mut *lock(&self.lines))
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.lines).is_empty()
    }

    /// Drains the buffer into the process-wide subscriber, indented by
    /// `base` levels.
    pub fn replay(&self, base: usize) {
        replay(self.take(), base);
    }
}

/// Emits `lines` through `tracing`, indented by `base` levels.
pub fn replay(lines: Vec<LogLine>, base: usize) {
    for line in lines {
        let pad = "  ".repeat(base + line.depth);
        match line.level {
            LogLevel::Debug => tracing::debug!("{pad}{}", line.message),
            LogLevel::Info => tracing::info!("{pad}{}", line.message),
            LogLevel::Warn => tracing::warn!("{pad}{}", line.message),
            LogLevel::Error => tracing::error!("{pad}{}", line.message),
        }
    }
}
