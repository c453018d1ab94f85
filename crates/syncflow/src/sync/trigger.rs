use crate::jobs::model::Job;
use crate::jobs::queue::{QueueClient, QueueError};
use crate::sync::collaborators::ConfigProvider;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("user {user_id} cannot be synced: {reason:#}")]
    Rejected {
        user_id: i64,
        reason: anyhow::Error,
    },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Upstream entry point: checks the user is syncable, then enqueues a
/// manual sync for them.
pub async fn request_manual_sync(
    configs: &dyn ConfigProvider,
    queue: &QueueClient,
    user_id: i64,
    triggered_by: &str,
) -> Result<Job, TriggerError> {
    configs
        .validate_user_can_be_processed(user_id)
        .await
        .map_err(|reason| TriggerError::Rejected { user_id, reason })?;

    let job = queue.enqueue(user_id, triggered_by).await?;
    tracing::info!(
        user_id,
        trace_id = %job.trace_id,
        triggered_by,
        "manual sync requested"
    );
    Ok(job)
}
