//! Prometheus metrics for job queues
//!
//! Provides observability into queue throughput and worker health.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another recorder
/// is already installed the failure is logged and metrics stay disabled.
pub fn init_metrics() {
    let result = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
    });

    if let Err(e) = result {
        warn!(error = %e, "Failed to install Prometheus recorder");
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Queue metrics helper
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    /// Queue name for labeling
    queue_name: String,
}

impl QueueMetrics {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }

    pub fn job_enqueued(&self, job_type: &'static str, delayed: bool) {
        counter!(
            "job_queue_jobs_enqueued_total",
            "queue" => self.queue_name.clone(),
            "type" => job_type,
            "delayed" => if delayed { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn job_cancelled(&self) {
        counter!(
            "job_queue_jobs_cancelled_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }

    /// Record a job delivered successfully
    pub fn job_completed(&self, job_type: &'static str, duration: Duration) {
        counter!(
            "job_queue_jobs_completed_total",
            "queue" => self.queue_name.clone(),
            "type" => job_type
        )
        .increment(1);

        histogram!(
            "job_queue_job_duration_seconds",
            "queue" => self.queue_name.clone(),
            "type" => job_type
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(&self, job_type: &'static str) {
        counter!(
            "job_queue_jobs_retried_total",
            "queue" => self.queue_name.clone(),
            "type" => job_type
        )
        .increment(1);
    }

    /// Record a job giving up for good
    pub fn job_failed(&self, job_type: &'static str, category: &'static str) {
        counter!(
            "job_queue_jobs_failed_total",
            "queue" => self.queue_name.clone(),
            "type" => job_type,
            "category" => category
        )
        .increment(1);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "job_queue_jobs_in_flight",
            "queue" => self.queue_name.clone()
        )
        .set(count as f64);
    }

    pub fn stalled_recovered(&self, count: u64) {
        counter!(
            "job_queue_stalled_recovered_total",
            "queue" => self.queue_name.clone()
        )
        .increment(count);
    }
}
