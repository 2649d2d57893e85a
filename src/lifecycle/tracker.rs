//! Completion barrier for the fixed set of long-running units.
//!
//! # Design Decisions
//! - Size is declared up front (topics + exporter), never discovered
//! - Spawning past the declared size is an error, as is running with fewer
//! - Waiting has one overall deadline; stragglers are aborted, not awaited

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Misuse of the worker set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerSetError {
    #[error("worker set already holds all {expected} units")]
    Full { expected: usize },

    #[error("worker set incomplete: {spawned} of {expected} units running")]
    Incomplete { expected: usize, spawned: usize },
}

/// Outcome of waiting for every unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitReport {
    pub expected: usize,
    /// Units that returned normally.
    pub completed: usize,
    /// Units that panicked.
    pub failed: Vec<String>,
    /// Units still running at the deadline.
    pub aborted: Vec<String>,
}

impl WaitReport {
    pub fn all_completed(&self) -> bool {
        self.completed == self.expected && self.failed.is_empty() && self.aborted.is_empty()
    }
}

struct Unit {
    name: String,
    handle: JoinHandle<()>,
}

/// The fixed set of concurrently running units the orchestrator waits on.
pub struct WorkerSet {
    expected: usize,
    units: Vec<Unit>,
}

impl WorkerSet {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            units: Vec::with_capacity(expected),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Spawn a tracked unit.
    pub fn spawn<F>(&mut self, name: impl Into<String>, unit: F) -> Result<(), WorkerSetError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.units.len() >= self.expected {
            return Err(WorkerSetError::Full {
                expected: self.expected,
            });
        }
        let name = name.into();
        tracing::debug!(unit = %name, "Spawning unit");
        self.units.push(Unit {
            name,
            handle: tokio::spawn(unit),
        });
        Ok(())
    }

    /// Check every declared unit has been spawned.
    pub fn ensure_complete(&self) -> Result<(), WorkerSetError> {
        if self.units.len() == self.expected {
            Ok(())
        } else {
            Err(WorkerSetError::Incomplete {
                expected: self.expected,
                spawned: self.units.len(),
            })
        }
    }

    /// Wait for every spawned unit, aborting whatever is left at `deadline`.
    pub async fn wait(self, deadline: Duration) -> WaitReport {
        let until = Instant::now() + deadline;
        let mut report = WaitReport {
            expected: self.expected,
            ..WaitReport::default()
        };

        for mut unit in self.units {
            match time::timeout_at(until, &mut unit.handle).await {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(e)) => {
                    tracing::error!(unit = %unit.name, error = %e, "Unit terminated abnormally");
                    report.failed.push(unit.name);
                }
                Err(_) => {
                    tracing::warn!(
                        unit = %unit.name,
                        "Unit still running at shutdown deadline, aborting"
                    );
                    unit.handle.abort();
                    report.aborted.push(unit.name);
                }
            }
        }

        report
    }
}
