//! Bounded worker pool with completion-order draining.
//!
//! A [`TaskScheduler`] owns a fixed number of named worker threads pulling
//! jobs from a shared queue. The driving thread submits closures, then calls
//! [`TaskScheduler::consume`], which hands each result back on the driving
//! thread in the order tasks *finish*, not the order they were submitted.
//!
//! # Invariants
//!
//! - Every submitted task is delivered to the consumer exactly once.
//! - A panic inside a task is caught on the worker, surfaced to the consumer
//!   as a [`TaskFailure`], and never prevents other tasks from completing.
//! - `consume` returns only after every submitted task has been delivered.
//! - Dropping the scheduler joins its workers, so outstanding work finishes
//!   before the owning thread moves on.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Errors returned by [`TaskScheduler`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// A worker thread could not be started.
    #[error("failed to start worker thread '{name}': {source}")]
    SpawnFailed {
        /// Name of the thread that failed to start.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Work was submitted after [`TaskScheduler::shutdown`].
    #[error("scheduler '{name}' no longer accepts work")]
    ShutDown {
        /// Name of the scheduler.
        name: String,
    },
}

/// A task that panicked instead of returning a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {message}")]
pub struct TaskFailure {
    /// The panic payload rendered as text.
    pub message: String,
}

impl TaskFailure {
    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }
}

/// A fixed-width pool of worker threads.
pub struct TaskScheduler<T: Send + 'static> {
    name: String,
    jobs: Option<Sender<Job<T>>>,
    completions: Receiver<Result<T, TaskFailure>>,
    workers: Vec<JoinHandle<()>>,
    outstanding: usize,
}

/// Default pool width: the number of logical CPUs available to the process.
#[must_use]
pub fn default_width() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl<T: Send + 'static> TaskScheduler<T> {
    /// Starts a pool of `width` workers named `<name>-<index>`.
    ///
    /// A width of zero is raised to one.
    pub fn new(name: impl Into<String>, width: usize) -> Result<Self, SchedulerError> {
        let name = name.into();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job<T>>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let mut workers = Vec::with_capacity(width.max(1));
        for index in 0..width.max(1) {
            let thread_name = format!("{name}-{index}");
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&jobs, &done))
                .map_err(|source| SchedulerError::SpawnFailed {
                    name: thread_name,
                    source,
                })?;
            workers.push(handle);
        }

        Ok(Self {
            name,
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
            outstanding: 0,
        })
    }

    /// Name given to this pool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads.
    #[must_use]
    pub fn width(&self) -> usize {
        self.workers.len()
    }

    /// Number of submitted tasks not yet delivered to a consumer.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Queues `task` for execution on a worker.
    pub fn submit<F>(&mut self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let shut_down = || SchedulerError::ShutDown {
            name: self.name.clone(),
        };
        let jobs = self.jobs.as_ref().ok_or_else(shut_down)?;
        jobs.send(Box::new(task)).map_err(|_| shut_down())?;
        self.outstanding += 1;
        Ok(())
    }

    /// Blocks until every submitted task has finished, handing each result to
    /// `on_complete` on the calling thread in completion order.
    pub fn consume<F>(&mut self, mut on_complete: F)
    where
        F: FnMut(Result<T, TaskFailure>),
    {
        while self.outstanding > 0 {
            let Ok(completion) = self.completions.recv() else {
                // Every worker is gone; nothing further can arrive.
                tracing::error!(
                    scheduler = %self.name,
                    outstanding = self.outstanding,
                    "workers exited with tasks outstanding"
                );
                self.outstanding = 0;
                break;
            };
            self.outstanding -= 1;
            on_complete(completion);
        }
    }

    /// Collects every result in completion order.
    pub fn drain(&mut self) -> Vec<Result<T, TaskFailure>> {
        let mut out = Vec::with_capacity(self.outstanding);
        self.consume(|result| out.push(result));
        out
    }

    /// Stops accepting new work. Queued and running tasks still complete.
    pub fn shutdown(&mut self) {
        self.jobs = None;
    }
}

impl<T: Send + 'static> Drop for TaskScheduler<T> {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!(scheduler = %self.name, "worker thread panicked outside a task");
            }
        }
    }
}

fn worker_loop<T>(jobs: &Receiver<Job<T>>, done: &Sender<Result<T, TaskFailure>>) {
    for job in jobs {
        let result = panic::catch_unwind(AssertUnwindSafe(job))
            .map_err(|payload| TaskFailure::from_panic(payload.as_ref()));
        // A dropped receiver still lets queued jobs run to completion.
        let _ = done.send(result);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivers_every_task_once() {
        let mut scheduler = TaskScheduler::new("test", 4).expect("scheduler");
        for i in 0..50 {
            scheduler.submit(move || i).expect("submit");
        }
        let mut seen: Vec<i32> = scheduler
            .drain()
            .into_iter()
            .map(|r| r.expect("task"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[test]
    fn delivers_in_completion_order() {
        let mut scheduler = TaskScheduler::new("order", 2).expect("scheduler");
        scheduler
            .submit(|| {
                thread::sleep(Duration::from_millis(300));
                "slow"
            })
            .expect("submit");
        scheduler.submit(|| "fast").expect("submit");

        let order: Vec<_> = scheduler
            .drain()
            .into_iter()
            .map(|r| r.expect("task"))
            .collect();
        assert_eq!(order, ["fast", "slow"]);
    }

    #[test]
    fn panics_surface_without_losing_other_tasks() {
        let mut scheduler = TaskScheduler::new("panics", 2).expect("scheduler");
        scheduler.submit(|| 1).expect("submit");
        scheduler
            .submit(|| -> i32 { panic!("boom") })
            .expect("submit");
        scheduler.submit(|| 3).expect("submit");

        let results = scheduler.drain();
        assert_eq!(results.len(), 3);
        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("boom"));
        let mut ok: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
        ok.sort_unstable();
        assert_eq!(ok, [1, 3]);
    }

    #[test]
    fn shutdown_rejects_new_work_but_finishes_queued() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut scheduler = TaskScheduler::new("shutdown", 1).expect("scheduler");
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            scheduler
                .submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
        scheduler.shutdown();
        assert!(matches!(
            scheduler.submit(|| ()),
            Err(SchedulerError::ShutDown { .. })
        ));
        assert_eq!(scheduler.drain().len(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_width_runs_one_worker() {
        let scheduler = TaskScheduler::<()>::new("narrow", 0).expect("scheduler");
        assert_eq!(scheduler.width(), 1);
    }

    #[test]
    fn workers_are_named() {
        let mut scheduler = TaskScheduler::new("named", 1).expect("scheduler");
        scheduler
            .submit(|| thread::current().name().map(str::to_string))
            .expect("submit");
        let name = scheduler.drain().pop().expect("one").expect("task");
        assert_eq!(name.as_deref(), Some("named-0"));
    }
}
