use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Snapshot of the current (or last) batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub current: usize,
    #[serde(rename = "is_running")]
    pub running: bool,
}

/// Shared batch progress. One instance per process, polled by readers while
/// fetch workers advance it.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<Progress>,
}

/// Marks a batch as running for as long as it is alive.
///
/// Dropping it clears the running flag, so every exit path of a batch,
/// including early returns and panics in the orchestrating task, ends it.
#[must_use = "the batch ends when this guard is dropped"]
pub struct RunningBatch<'a> {
    tracker: &'a ProgressTracker,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking worker must not wedge progress reporting
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Progress {
        *self.lock()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Start a batch unless one is already running.
    ///
    /// The check and the reset happen under one lock, so two concurrent
    /// callers can never both start.
    pub fn try_begin(&self) -> Option<RunningBatch<'_>> {
        let mut progress = self.lock();
        if progress.running {
            return None;
        }
        *progress = Progress {
            total: 0,
            current: 0,
            running: true,
        };
        Some(RunningBatch { tracker: self })
    }

    pub fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    /// Count one more finished source. Never exceeds `total`.
    pub fn complete_one(&self) {
        let mut progress = self.lock();
        if progress.current < progress.total {
            progress.current += 1;
        }
    }
}

impl Drop for RunningBatch<'_> {
    fn drop(&mut self) {
        self.tracker.lock().running = false;
    }
}
