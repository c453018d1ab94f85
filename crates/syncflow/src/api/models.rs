// crates/syncflow/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::pool::{PoolState, PoolStats};

#[derive(Debug, Clone, Deserialize)]
pub struct ManualSyncRequest {
    pub user_id: i64,
    /// Defaults to `user_request`.
    pub triggered_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualSyncResponse {
    pub job_id: Uuid,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub now_utc: DateTime<Utc>,
    pub queue: String,
    pub queue_length: Option<i64>,
    pub queue_error: Option<String>,

    pub pool_state: PoolState,
    pub worker_count: usize,
    pub stats: PoolStats,
}
