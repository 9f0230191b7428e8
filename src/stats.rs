//! Running processing statistics.
//!
//! One [`ProcessingStats`] lives inside each orchestrator and is updated at
//! the end of every run. All counters are atomics, so concurrent `process`
//! calls record without locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free run counters.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug)]
pub struct ProcessingStats {
    total_runs: AtomicU64,
    degraded_runs: AtomicU64,
    total_ms: AtomicU64,
    fastest_ms: AtomicU64,
    slowest_ms: AtomicU64,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStats {
    /// All counters at zero.
    pub fn new() -> Self {
        Self {
            total_runs: AtomicU64::new(0),
            degraded_runs: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            fastest_ms: AtomicU64::new(u64::MAX),
            slowest_ms: AtomicU64::new(0),
        }
    }

    /// Record one finished run.
    pub fn record(&self, elapsed_ms: u64, degraded: bool) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_runs.fetch_add(1, Ordering::Relaxed);
        }
        self.total_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.fastest_ms.fetch_min(elapsed_ms, Ordering::Relaxed);
        self.slowest_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let total_runs = self.total_runs.load(Ordering::Relaxed);
        let degraded_runs = self.degraded_runs.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let fastest = self.fastest_ms.load(Ordering::Relaxed);

        StatsSnapshot {
            total_runs,
            completed_runs: total_runs.saturating_sub(degraded_runs),
            degraded_runs,
            avg_processing_ms: if total_runs > 0 {
                total_ms as f64 / total_runs as f64
            } else {
                0.0
            },
            fastest_ms: (fastest != u64::MAX).then_some(fastest),
            slowest_ms: (total_runs > 0).then(|| self.slowest_ms.load(Ordering::Relaxed)),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.total_runs.store(0, Ordering::Relaxed);
        self.degraded_runs.store(0, Ordering::Relaxed);
        self.total_ms.store(0, Ordering::Relaxed);
        self.fastest_ms.store(u64::MAX, Ordering::Relaxed);
        self.slowest_ms.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of [`ProcessingStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Runs started and finished.
    pub total_runs: u64,
    /// Runs that finished with a generated draft.
    pub completed_runs: u64,
    /// Runs that fell back to deterministic scenarios.
    pub degraded_runs: u64,
    /// Mean end-to-end time.
    pub avg_processing_ms: f64,
    /// Fastest run, if any.
    pub fastest_ms: Option<u64>,
    /// Slowest run, if any.
    pub slowest_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let s = ProcessingStats::new().snapshot();
        assert_eq!(s.total_runs, 0);
        assert!((s.avg_processing_ms - 0.0).abs() < f64::EPSILON);
        assert_eq!(s.fastest_ms, None);
        assert_eq!(s.slowest_ms, None);
    }

    #[test]
    fn test_record_updates_counters() {
        let stats = ProcessingStats::new();
        stats.record(100, false);
        stats.record(300, true);
        let s = stats.snapshot();
        assert_eq!(s.total_runs, 2);
        assert_eq!(s.completed_runs, 1);
        assert_eq!(s.degraded_runs, 1);
        assert!((s.avg_processing_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(s.fastest_ms, Some(100));
        assert_eq!(s.slowest_ms, Some(300));
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = ProcessingStats::new();
        stats.record(50, true);
        stats.reset();
        assert_eq!(stats.snapshot(), ProcessingStats::new().snapshot());
    }
}
