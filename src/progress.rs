//! Background progress monitor for matrix runs.
//!
//! While one combination runs, periodically logs how long it has been
//! running and where the matrix stands, so operators watching a long
//! build can tell it is still alive. Purely informational.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of matrix progress counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Combinations finished so far.
    pub completed: usize,
    /// Combinations that passed.
    pub passed: usize,
    /// Combinations whose container exited non-zero.
    pub failed: usize,
    /// Combinations that hit an infrastructure error.
    pub infrastructure: usize,
    /// Wall-clock time since the monitor started.
    pub elapsed: Duration,
}

/// Shared atomic counters for matrix progress tracking.
///
/// Updated by the matrix runner, read by the background monitor.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub completed: Arc<AtomicUsize>,
    pub passed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub infrastructure: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    /// Create a new set of zeroed progress counters.
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            passed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            infrastructure: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            infrastructure: self.infrastructure.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs progress of one combination.
///
/// Call [`ProgressMonitor::stop`] to cancel and join it.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a background monitor that logs every `interval`.
    ///
    /// # Arguments
    ///
    /// * `label` - The combination being run, as shown in the log
    /// * `counters` - Shared counters updated by the matrix runner
    /// * `total` - Number of combinations in the matrix
    /// * `interval` - How often to emit progress logs
    pub fn start(
        label: String,
        counters: ProgressCounters,
        total: usize,
        interval: Duration,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.completed as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    combination = %label,
                    completed = snap.completed,
                    total = total,
                    passed = snap.passed,
                    failed = snap.failed,
                    infrastructure = snap.infrastructure,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Running sanity test"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // The monitor may be parked on a long tick; aborting ends it now.
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters_default() {
        let counters = ProgressCounters::new();
        let snap = counters.snapshot(Instant::now());
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.passed, 0);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.infrastructure, 0);
    }

    #[test]
    fn test_progress_counters_clone_shares_state() {
        let counters = ProgressCounters::new();
        let clone = counters.clone();

        counters.completed.fetch_add(2, Ordering::Relaxed);
        counters.failed.fetch_add(1, Ordering::Relaxed);

        let snap = clone.snapshot(Instant::now());
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
    }

    #[tokio::test]
    async fn test_progress_monitor_start_stop() {
        let counters = ProgressCounters::new();
        counters.completed.fetch_add(3, Ordering::Relaxed);

        let monitor = ProgressMonitor::start(
            "gcc-11:g++-11 @ 3.25".to_string(),
            counters,
            10,
            Duration::from_millis(50),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_long_interval() {
        let monitor = ProgressMonitor::start(
            "slow".to_string(),
            ProgressCounters::new(),
            1,
            Duration::from_secs(3600),
        );

        tokio::time::timeout(Duration::from_secs(5), monitor.stop())
            .await
            .expect("stop should return promptly");
    }
}
