//! Health check handlers for queue workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue monitoring (`/queue/info`, `/queue/failed`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::QueueResult;
use crate::metrics;
use crate::queue::QueueStats;

type FailedJobsFuture = Pin<Box<dyn Future<Output = QueueResult<Vec<Value>>> + Send>>;

/// Type-erased listing of recently failed jobs as JSON.
pub type FailedJobsFn = Arc<dyn Fn(usize) -> FailedJobsFuture + Send + Sync>;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub queue: Arc<dyn QueueStats>,
    pub app_name: String,
    pub app_version: String,
    /// Backs `/queue/failed` when set.
    pub failed_jobs: Option<FailedJobsFn>,
}

impl HealthState {
    pub fn new(queue: Arc<dyn QueueStats>, app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            queue,
            app_name: app_name.into(),
            app_version: app_version.into(),
            failed_jobs: None,
        }
    }

    /// Expose the most recent permanently failed jobs of a typed queue.
    pub fn with_failed_jobs<J, Q>(mut self, queue: Arc<Q>) -> Self
    where
        J: crate::QueueJob,
        Q: crate::JobQueue<J> + ?Sized + 'static,
    {
        self.failed_jobs = Some(Arc::new(move |limit| -> FailedJobsFuture {
            let queue = queue.clone();
            Box::pin(async move {
                let failed = queue.failed_jobs(limit).await?;
                failed
                    .into_iter()
                    .map(|job| serde_json::to_value(job).map_err(Into::into))
                    .collect()
            })
        }));
        self
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Checks that the queue's backing store answers.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match state.queue.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": {
                    "queue": "ok"
                }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": {
                    "queue": format!("error: {}", e)
                }
            })),
        )),
    }
}

/// Queue info handler for monitoring.
pub async fn queue_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.queue.counts().await {
        Ok(counts) => Ok(Json(json!({
            "queue": state.queue.name(),
            "scheduled": counts.scheduled,
            "active": counts.active,
            "completed": counts.completed,
            "failed": counts.failed,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Failed to get queue info: {}", e)
            })),
        )),
    }
}

/// Query parameters for the failed job listing.
#[derive(Debug, Deserialize)]
pub struct FailedListParams {
    /// Maximum number of jobs to return (default: 10, max: 50)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// List the most recent permanently failed jobs.
///
/// `GET /queue/failed?limit=10`
pub async fn failed_jobs_handler(
    State(state): State<HealthState>,
    Query(params): Query<FailedListParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(list) = state.failed_jobs.as_ref() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Failed job listing is not enabled" })),
        ));
    };

    let limit = params.limit.min(50);
    match list(limit).await {
        Ok(jobs) => Ok(Json(json!({
            "jobs": jobs,
            "limit": limit,
            "count": jobs.len()
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/queue/info` - Queue sizes
/// - `/queue/failed` - Recently failed jobs
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queue/info", get(queue_info_handler))
        .route("/queue/failed", get(failed_jobs_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
