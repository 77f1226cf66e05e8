//! Worker-pool execution of independent batch tasks.
//!
//! Work across symbols and across symbol pairs is embarrassingly parallel:
//! tasks are dispatched to a pool of scoped threads sized to the hardware via
//! an atomic work index. A failing task is logged and counted; it never stops
//! the batch.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    thread,
};

use tracing::error;

use crate::Result;

/// The outcome of a batch: how many tasks succeeded and how many failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// The number of tasks that completed without error.
    pub succeeded: usize,
    /// The number of tasks that returned an error.
    pub failed: usize,
}

impl BatchSummary {
    /// Returns the total number of tasks run.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Returns the worker count for `task_count` tasks: hardware parallelism
/// capped by the number of tasks.
pub fn worker_count(task_count: usize) -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(task_count.max(1))
}

/// Runs `run` over every task on a worker pool, counting successes and
/// failures. Task errors are logged and confined to their task.
pub fn run_parallel<T, F>(tasks: &[T], run: F) -> BatchSummary
where
    T: Sync,
    F: Fn(&T) -> Result<()> + Sync,
{
    if tasks.is_empty() {
        return BatchSummary::default();
    }
    let next = AtomicUsize::new(0);
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..worker_count(tasks.len()) {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(task) = tasks.get(idx) else {
                    break;
                };
                match run(task) {
                    Ok(()) => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!("batch task failed: {e}");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    BatchSummary {
        succeeded: succeeded.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    }
}

/// Maps `map` over every item on a worker pool, preserving item order in the
/// returned vector.
pub fn par_map<T, U, F>(items: &[T], map: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(items.len()));
    thread::scope(|scope| {
        for _ in 0..worker_count(items.len()) {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else {
                    break;
                };
                let out = map(item);
                results.lock().unwrap().push((idx, out));
            });
        }
    });
    let mut results = results.into_inner().unwrap();
    results.sort_unstable_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, out)| out).collect()
}
