// Round statistics: worker counts and settled items.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub requested: usize,
    pub active_workers: usize,
    pub peak_workers: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
}

pub struct RoundStats {
    requested: usize,
    active_workers: AtomicUsize,
    peak_workers: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    started_at: Instant,
}

impl RoundStats {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            active_workers: AtomicUsize::new(0),
            peak_workers: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn increment_workers(&self) {
        let now = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_workers.fetch_max(now, Ordering::SeqCst);
    }

    pub fn decrement_workers(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// True once every requested item has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
            >= self.requested
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            requested: self.requested,
            active_workers: self.active_workers.load(Ordering::SeqCst),
            peak_workers: self.peak_workers.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed_ms: self.started_at.elapsed().as_millis(),
        }
    }
}
