//! Progress tracking and cooperative cancellation for retrieval runs.
//!
//! # Usage
//!
//! ```ignore
//! use patent_harvest::utils::{CancelFlag, RetrievalProgress};
//!
//! let cancel = CancelFlag::new();
//! let observer = |p: &RetrievalProgress| {
//!     println!("{}/{} after {:.1}s", p.records_processed, p.records_target, p.elapsed_secs());
//! };
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of a retrieval run, reported once per page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalProgress {
    /// Data rows written so far
    pub records_processed: u64,

    /// `min(server total, ceiling)`
    pub records_target: u64,

    /// Wall-clock time since the run started
    pub elapsed: Duration,
}

impl RetrievalProgress {
    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Completion percentage, 0 when the target is unknown
    pub fn percent(&self) -> f64 {
        if self.records_target == 0 {
            return 0.0;
        }
        (self.records_processed as f64 / self.records_target as f64 * 100.0).min(100.0)
    }

    /// Estimate time remaining from the average rate so far
    pub fn eta(&self) -> Option<Duration> {
        if self.records_processed == 0 {
            return None;
        }
        let per_record = self.elapsed.as_secs_f64() / self.records_processed as f64;
        let remaining = self.records_target.saturating_sub(self.records_processed);
        Some(Duration::from_secs_f64(per_record * remaining as f64))
    }
}

/// Receives progress after every page.
///
/// Called synchronously on the retrieval task; implementations must return quickly
/// and must not panic.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, progress: &RetrievalProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&RetrievalProgress) + Send,
{
    fn on_progress(&mut self, progress: &RetrievalProgress) {
        self(progress)
    }
}

/// Observer that discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: &RetrievalProgress) {}
}

/// Running counters for one retrieval run
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    records_processed: u64,
    records_target: u64,
    start_time: Instant,
}

impl ProgressTracker {
    /// Start tracking now
    pub fn start() -> Self {
        Self {
            records_processed: 0,
            records_target: 0,
            start_time: Instant::now(),
        }
    }

    /// Fix the target once the server total is known
    pub fn set_target(&mut self, server_total: u64, ceiling: u64) {
        self.records_target = server_total.min(ceiling);
    }

    /// Count rows written for one page
    pub fn add(&mut self, rows: u64) {
        self.records_processed += rows;
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed
    }

    pub fn records_target(&self) -> u64 {
        self.records_target
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RetrievalProgress {
        RetrievalProgress {
            records_processed: self.records_processed,
            records_target: self.records_target,
            elapsed: self.start_time.elapsed(),
        }
    }
}

/// Cooperative cancellation flag, checked once per page
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect before the next page request or during a
    /// rate-limit wait
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_target_is_capped() {
        let mut tracker = ProgressTracker::start();
        tracker.set_target(120_000, 50_000);
        assert_eq!(tracker.records_target(), 50_000);

        tracker.set_target(250, 50_000);
        assert_eq!(tracker.records_target(), 250);
    }

    #[test]
    fn test_tracker_accumulates() {
        let mut tracker = ProgressTracker::start();
        tracker.set_target(250, 50_000);
        tracker.add(100);
        tracker.add(100);
        tracker.add(50);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.records_processed, 250);
        assert_eq!(snapshot.records_target, 250);
        assert_eq!(snapshot.percent(), 100.0);
    }

    #[test]
    fn test_progress_eta() {
        let progress = RetrievalProgress {
            records_processed: 100,
            records_target: 300,
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(progress.eta(), Some(Duration::from_secs(20)));
        assert_eq!(progress.percent().round(), 33.0);

        let idle = RetrievalProgress {
            records_processed: 0,
            records_target: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(idle.eta(), None);
        assert_eq!(idle.percent(), 0.0);
    }

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |p: &RetrievalProgress| seen.push(p.records_processed);
            let progress = RetrievalProgress {
                records_processed: 42,
                records_target: 100,
                elapsed: Duration::ZERO,
            };
            observer.on_progress(&progress);
        }
        assert_eq!(seen, vec![42]);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
