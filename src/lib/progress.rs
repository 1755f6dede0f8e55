//! Progress tracking for region processing.
//!
//! Regions are finished by several workers at once, so the tracker keeps an atomic count and logs
//! whenever the count crosses an interval boundary.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe progress tracker that logs at regular intervals.
///
/// # Example
/// ```
/// use vardict_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Processed regions").with_interval(100);
/// for _ in 0..250 {
///     tracker.log_if_needed(1); // logs at 100 and 200
/// }
/// tracker.log_final(); // logs "Processed regions 250 (complete)"
/// ```
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker with the given message prefix and a default interval of 1,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 1_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Sets the logging interval. An interval of zero is treated as one.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Adds to the count and logs once per interval boundary crossed.
    ///
    /// Returns `true` when the new count lands exactly on an interval boundary.
    pub fn log_if_needed(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count.is_multiple_of(self.interval);
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;

        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, i * self.interval);
        }

        new_count.is_multiple_of(self.interval)
    }

    /// Logs the final count unless the last update already logged it.
    pub fn log_final(&self) {
        if !self.log_if_needed(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!("{} {} (complete)", self.message, count);
            }
        }
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let tracker = ProgressTracker::new("Regions");
        assert_eq!(tracker.interval, 1_000);
        assert_eq!(tracker.count(), 0);
        assert_eq!(ProgressTracker::new("x").with_interval(0).interval, 1);
    }

    #[test]
    fn test_log_if_needed_returns_on_boundary() {
        let tracker = ProgressTracker::new("Test").with_interval(10);
        assert!(!tracker.log_if_needed(5));
        assert!(tracker.log_if_needed(5));
        assert!(!tracker.log_if_needed(15));
        assert_eq!(tracker.count(), 25);
        assert!(!tracker.log_if_needed(0));
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(ProgressTracker::new("Test").with_interval(50));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..25 {
                        tracker.log_if_needed(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.count(), 100);
        tracker.log_final();
    }
}
