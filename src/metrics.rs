// Performance metrics module
//
// Lightweight counters for build and sanitize activity, logged on shutdown.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide activity counters.
///
/// Uses atomic operations so workers can record without locks.
#[derive(Debug)]
pub struct Metrics {
    /// Build steps whose bundler process exited successfully
    pub steps_succeeded: AtomicUsize,

    /// Build steps that failed to launch or exited non-zero
    pub steps_failed: AtomicUsize,

    /// Lines of bundler output forwarded to the front end
    pub lines_streamed: AtomicU64,

    pub files_sanitized: AtomicUsize,
    pub files_failed: AtomicUsize,

    /// Wall-clock time spent in build runs, in milliseconds
    pub total_build_time_ms: AtomicU64,

    /// Events drained by the front-end pump
    pub events_drained: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            steps_succeeded: AtomicUsize::new(0),
            steps_failed: AtomicUsize::new(0),
            lines_streamed: AtomicU64::new(0),
            files_sanitized: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            total_build_time_ms: AtomicU64::new(0),
            events_drained: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_step(&self, success: bool) {
        if success {
            self.steps_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.steps_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_line(&self) {
        self.lines_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file(&self, success: bool) {
        if success {
            self.files_sanitized.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_build_time(&self, duration: Duration) {
        self.total_build_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_events_drained(&self, count: usize) {
        self.events_drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Build steps: {} succeeded, {} failed ({} output lines, {:.2}s total)",
            self.steps_succeeded.load(Ordering::Relaxed),
            self.steps_failed.load(Ordering::Relaxed),
            self.lines_streamed.load(Ordering::Relaxed),
            self.total_build_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
        tracing::info!(
            "Sanitized files: {} ok, {} failed",
            self.files_sanitized.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Front-end events drained: {}",
            self.events_drained.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
