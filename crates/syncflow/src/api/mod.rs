use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::api::models::{ManualSyncRequest, ManualSyncResponse, StatusResponse};
use crate::jobs::pool::WorkerPool;
use crate::jobs::queue::{QueueClient, QueueError};
use crate::sync::collaborators::ConfigProvider;
use crate::sync::trigger::{request_manual_sync, TriggerError};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub queue: QueueClient,
    pub pool: Arc<WorkerPool<QueueClient>>,
    pub configs: Arc<dyn ConfigProvider>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Trigger
        .route("/jobs/manual-sync", post(enqueue_manual_sync))
        // Status
        .route("/status", get(status))
        .route("/metrics/prom", get(metrics_prom))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

fn queue_err(e: QueueError) -> (StatusCode, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("queue unavailable: {e}"),
    )
}

pub async fn enqueue_manual_sync(
    State(state): State<ApiState>,
    Json(body): Json<ManualSyncRequest>,
) -> Result<(StatusCode, Json<ManualSyncResponse>), (StatusCode, String)> {
    if body.user_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "user_id must be > 0".into()));
    }
    let triggered_by = body
        .triggered_by
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("user_request");

    let job = request_manual_sync(state.configs.as_ref(), &state.queue, body.user_id, triggered_by)
        .await
        .map_err(|e| match e {
            TriggerError::Rejected { .. } => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            TriggerError::Queue(e) => queue_err(e),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ManualSyncResponse {
            job_id: job.id,
            trace_id: job.trace_id,
        }),
    ))
}

pub async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let (queue_length, queue_error) = match state.queue.queue_length().await {
        Ok(n) => (Some(n), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Json(StatusResponse {
        now_utc: Utc::now(),
        queue: state.queue.queue_name().to_string(),
        queue_length,
        queue_error,
        pool_state: state.pool.state(),
        worker_count: state.pool.worker_count(),
        stats: state.pool.stats(),
    })
}

pub async fn metrics_prom(State(state): State<ApiState>) -> Response {
    // Prometheus text exposition format.
    let stats = state.pool.stats();
    match state.queue.queue_length().await {
        Ok(queue_length) => {
            let body = format!(
                concat!(
                    "# HELP syncflow_queue_length Number of unconsumed queue entries\n",
                    "# TYPE syncflow_queue_length gauge\n",
                    "syncflow_queue_length {}\n",
                    "# HELP syncflow_jobs_processed_total Jobs processed successfully\n",
                    "# TYPE syncflow_jobs_processed_total counter\n",
                    "syncflow_jobs_processed_total {}\n",
                    "# HELP syncflow_jobs_failed_total Jobs that failed or had no processor\n",
                    "# TYPE syncflow_jobs_failed_total counter\n",
                    "syncflow_jobs_failed_total {}\n",
                    "# HELP syncflow_active_workers Worker loops currently running\n",
                    "# TYPE syncflow_active_workers gauge\n",
                    "syncflow_active_workers {}\n"
                ),
                queue_length, stats.jobs_processed, stats.jobs_failed, stats.active_workers
            );

            (StatusCode::OK, body).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.queue.health_check().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => queue_err(e),
    }
}
