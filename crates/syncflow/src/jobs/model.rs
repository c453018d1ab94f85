use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Selects which processor handles a job.
///
/// Tags that this build does not know decode to `Unknown` so the job still
/// reaches dispatch (and is reported there) instead of failing to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ManualSync,
    ScheduledSync,
    SendNotification,
    #[serde(other)]
    Unknown,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ManualSync => "manual_sync",
            JobType::ScheduledSync => "scheduled_sync",
            JobType::SendNotification => "send_notification",
            JobType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of queued work. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub user_id: i64,
    pub trace_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub user_id: i64,
    pub data: Map<String, Value>,
    pub timeout_seconds: u64,
}

impl NewJob {
    pub fn new(job_type: JobType, user_id: i64) -> Self {
        Self {
            job_type,
            user_id,
            data: Map::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn manual_sync(user_id: i64, triggered_by: &str) -> Self {
        Self::new(JobType::ManualSync, user_id).with_data("triggered_by", triggered_by)
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    /// Stamps identity and creation time. Called once, at enqueue.
    pub fn into_job(self) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: self.job_type,
            user_id: self.user_id,
            trace_id: Uuid::new_v4().to_string(),
            data: self.data,
            created_at: Utc::now(),
            timeout_seconds: self.timeout_seconds,
        }
    }
}

impl Job {
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_payload(payload: Value) -> serde_json::Result<Self> {
        serde_json::from_value(payload)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn triggered_by(&self) -> Option<&str> {
        self.data.get("triggered_by").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_round_trip_keeps_every_field() {
        let job = NewJob::manual_sync(42, "user_request")
            .with_timeout_seconds(120)
            .into_job();

        let back = Job::from_payload(job.to_payload().unwrap()).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn wire_shape_uses_type_tag_and_defaults_timeout() {
        let id = Uuid::new_v4();
        let payload = json!({
            "id": id,
            "type": "manual_sync",
            "user_id": 7,
            "trace_id": "abc",
            "data": { "triggered_by": "scheduler" },
            "created_at": "2024-05-01T10:00:00Z"
        });

        let job = Job::from_payload(payload).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.job_type, JobType::ManualSync);
        assert_eq!(job.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(job.triggered_by(), Some("scheduler"));

        let out = job.to_payload().unwrap();
        assert_eq!(out["type"], "manual_sync");
    }

    #[test]
    fn unrecognized_type_decodes_as_unknown() {
        let payload = json!({
            "id": Uuid::new_v4(),
            "type": "export_everything",
            "user_id": 1,
            "trace_id": "t",
            "created_at": "2024-05-01T10:00:00Z"
        });

        let job = Job::from_payload(payload).unwrap();
        assert_eq!(job.job_type, JobType::Unknown);
        assert!(job.data.is_empty());
    }

    #[test]
    fn each_job_gets_fresh_trace_id() {
        let a = NewJob::manual_sync(1, "user_request").into_job();
        let b = NewJob::manual_sync(1, "user_request").into_job();
        assert_ne!(a.trace_id, b.trace_id);
        assert_ne!(a.id, b.id);
    }
}
