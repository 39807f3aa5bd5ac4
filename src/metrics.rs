// Performance metrics module
//
// Provides lightweight counters for job runs, settings flushes and tool processes

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Launcher-wide counters
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Shared as `Arc<Metrics>` between the job tracker, the settings store and
/// the process runner, and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    pub jobs_started: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,

    pub steps_succeeded: AtomicU64,
    pub steps_failed: AtomicU64,

    /// Total wall time spent inside step actions, in milliseconds
    pub total_step_time_ms: AtomicU64,

    pub settings_flushes: AtomicU64,
    pub settings_flush_failures: AtomicU64,

    pub processes_spawned: AtomicU64,
    pub processes_timed_out: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_started: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            steps_succeeded: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            total_step_time_ms: AtomicU64::new(0),
            settings_flushes: AtomicU64::new(0),
            settings_flush_failures: AtomicU64::new(0),
            processes_spawned: AtomicU64::new(0),
            processes_timed_out: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_finished(&self, success: bool) {
        if success {
            self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one settled step and how long its action took
    pub fn record_step(&self, success: bool, duration: Duration) {
        if success {
            self.steps_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.steps_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_step_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_settings_flush(&self, success: bool) {
        if success {
            self.settings_flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.settings_flush_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_process_spawned(&self) {
        self.processes_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_timeout(&self) {
        self.processes_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average step duration in milliseconds
    pub fn avg_step_time_ms(&self) -> f64 {
        let total = self.total_step_time_ms.load(Ordering::Relaxed);
        let count = self.steps_succeeded.load(Ordering::Relaxed)
            + self.steps_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Launcher Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Jobs: {} started, {} succeeded, {} failed",
            self.jobs_started.load(Ordering::Relaxed),
            self.jobs_succeeded.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Steps: {} succeeded, {} failed (avg: {:.2}ms per step)",
            self.steps_succeeded.load(Ordering::Relaxed),
            self.steps_failed.load(Ordering::Relaxed),
            self.avg_step_time_ms()
        );
        tracing::info!(
            "Settings flushes: {}, failures: {}",
            self.settings_flushes.load(Ordering::Relaxed),
            self.settings_flush_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Processes: {} spawned, {} timed out",
            self.processes_spawned.load(Ordering::Relaxed),
            self.processes_timed_out.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.jobs_started.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.steps_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_jobs_and_steps() {
        let metrics = Metrics::new();

        metrics.record_job_started();
        metrics.record_step(true, Duration::from_millis(100));
        metrics.record_step(false, Duration::from_millis(200));
        metrics.record_job_finished(false);

        assert_eq!(metrics.jobs_started.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.jobs_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.steps_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.steps_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_step_time_ms(), 150.0);
    }

    #[test]
    fn test_avg_step_time_no_steps() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_step_time_ms(), 0.0);
    }

    #[test]
    fn test_flush_and_process_counters() {
        let metrics = Metrics::new();

        metrics.record_settings_flush(true);
        metrics.record_settings_flush(false);
        metrics.record_process_spawned();
        metrics.record_process_timeout();

        assert_eq!(metrics.settings_flushes.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.settings_flush_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.processes_spawned.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.processes_timed_out.load(Ordering::Relaxed), 1);
    }
}
