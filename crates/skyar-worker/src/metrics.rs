//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const BATCHES_SUBMITTED_TOTAL: &str = "skyar_batches_submitted_total";
    pub const JOBS_DISPATCHED_TOTAL: &str = "skyar_jobs_dispatched_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "skyar_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "skyar_jobs_failed_total";
    pub const RENDER_DURATION_SECONDS: &str = "skyar_render_duration_seconds";
    pub const QUEUED_BATCHES: &str = "skyar_queued_batches";
    pub const RECONCILE_OUTCOMES_TOTAL: &str = "skyar_reconcile_outcomes_total";
}

/// Serve Prometheus metrics on `0.0.0.0:<port>`.
pub fn init_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_batch_submitted(jobs: usize) {
    counter!(names::BATCHES_SUBMITTED_TOTAL).increment(1);
    counter!(names::JOBS_DISPATCHED_TOTAL).increment(jobs as u64);
}

pub fn set_queued_batches(count: usize) {
    gauge!(names::QUEUED_BATCHES).set(count as f64);
}

pub fn record_job_completed(file_type: &str, elapsed: Duration) {
    let labels = [("file_type", file_type.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

pub fn record_job_failed(file_type: &str, reason: &'static str) {
    let labels = [
        ("file_type", file_type.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_reconcile(outcome: &'static str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::RECONCILE_OUTCOMES_TOTAL, &labels).increment(1);
}
