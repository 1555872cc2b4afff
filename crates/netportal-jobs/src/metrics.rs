//! Job engine metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left
//! to the embedding binary.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `netportal_jobs_created_total` | Counter | `kind` | Jobs created (root or child) |
//! | `netportal_job_transitions_total` | Counter | `to_state` | Job status changes |
//! | `netportal_job_duration_seconds` | Histogram | `status` | Worker run time |
//! | `netportal_jobs_aged_total` | Counter | `reason` | Jobs removed by sweeps or flushes |
//! | `netportal_batch_inflight` | Gauge | - | Jobs currently started by batch runners |
//!
//! ```rust,no_run
//! use netportal_jobs::metrics::JobMetrics;
//!
//! let metrics = JobMetrics::new();
//! metrics.record_created(false);
//! metrics.record_transition("running");
//! ```

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Counter: jobs created.
    pub const JOBS_CREATED_TOTAL: &str = "netportal_jobs_created_total";
    /// Counter: job status transitions.
    pub const JOB_TRANSITIONS_TOTAL: &str = "netportal_job_transitions_total";
    /// Histogram: worker run time in seconds.
    pub const JOB_DURATION_SECONDS: &str = "netportal_job_duration_seconds";
    /// Counter: jobs deleted by aging or flushing.
    pub const JOBS_AGED_TOTAL: &str = "netportal_jobs_aged_total";
    /// Gauge: jobs in flight across batch runners.
    pub const BATCH_INFLIGHT: &str = "netportal_batch_inflight";
}

/// Label keys.
pub mod labels {
    /// `root` or `child`.
    pub const KIND: &str = "kind";
    /// Target status label.
    pub const TO_STATE: &str = "to_state";
    /// Final status label.
    pub const STATUS: &str = "status";
    /// Why a job was deleted (`ancient`, `old`, `flushed`, `deleted`).
    pub const REASON: &str = "reason";
}

/// Records job engine metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobMetrics;

impl JobMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a created job.
    pub fn record_created(&self, child: bool) {
        counter!(
            names::JOBS_CREATED_TOTAL,
            labels::KIND => if child { "child" } else { "root" },
        )
        .increment(1);
    }

    /// Records a status transition.
    pub fn record_transition(&self, to_state: &str) {
        counter!(
            names::JOB_TRANSITIONS_TOTAL,
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records how long a worker ran.
    pub fn observe_duration(&self, status: &str, duration: Duration) {
        histogram!(
            names::JOB_DURATION_SECONDS,
            labels::STATUS => status.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records deleted jobs.
    pub fn record_aged(&self, reason: &'static str, count: usize) {
        if count > 0 {
            counter!(names::JOBS_AGED_TOTAL, labels::REASON => reason).increment(count as u64);
        }
    }

    /// Adjusts the in-flight batch gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn add_batch_inflight(&self, delta: i64) {
        gauge!(names::BATCH_INFLIGHT).increment(delta as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_harmless() {
        let metrics = JobMetrics::new();
        metrics.record_created(true);
        metrics.record_transition("complete");
        metrics.observe_duration("complete", Duration::from_millis(5));
        metrics.record_aged("old", 3);
        metrics.add_batch_inflight(2);
        metrics.add_batch_inflight(-2);
    }
}
