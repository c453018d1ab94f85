// crates/syncflow/src/jobs/queue.rs

use crate::jobs::model::{Job, NewJob};
use crate::jobs::retry::{retry, RetryConfig, RetryError};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_NAME: &str = "jobs_queue";

/// Gap between pop attempts while a dequeue is waiting for work.
const POP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(#[from] sqlx::Error),
    #[error("failed to encode job: {0}")]
    Encode(#[source] serde_json::Error),
    /// The entry was already removed from the queue when this happened.
    #[error("failed to decode queue entry {entry_id}: {source}")]
    Decode {
        entry_id: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

impl From<RetryError<QueueError>> for QueueError {
    fn from(err: RetryError<QueueError>) -> Self {
        match err {
            RetryError::Operation(e) => e,
            RetryError::Cancelled { .. } => QueueError::Cancelled,
        }
    }
}

/// Where a worker pool gets its jobs from.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    /// Waits up to `wait` for a job. `Ok(None)` means nothing arrived.
    async fn dequeue(
        &self,
        cancel: &CancellationToken,
        wait: Duration,
    ) -> Result<Option<Job>, QueueError>;

    /// Releases the transport. Called once, after every worker has stopped.
    async fn close(&self);
}

/// Shared FIFO list stored in `queue_entries`, one logical list per name.
#[derive(Clone)]
pub struct QueueClient {
    pool: PgPool,
    queue: String,
    retry_cfg: RetryConfig,
}

impl QueueClient {
    pub fn new(pool: PgPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
            retry_cfg: RetryConfig::default(),
        }
    }

    /// Connects with the critical retry profile and verifies the transport.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        queue: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let cancel = CancellationToken::new();
        let pool = retry(&cancel, &RetryConfig::critical(), "queue_connect", || {
            crate::db::make_pool(database_url, max_connections)
        })
        .await
        .map_err(|e| match e {
            RetryError::Operation(e) => QueueError::Transport(e),
            RetryError::Cancelled { .. } => QueueError::Cancelled,
        })?;

        let client = Self::new(pool, queue);
        client.health_check().await?;
        Ok(client)
    }

    pub fn with_retry(mut self, cfg: RetryConfig) -> Self {
        self.retry_cfg = cfg;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Producers
    // ----------------------------

    /// Enqueues a manual sync for `user_id`, tagged with who triggered it.
    pub async fn enqueue(&self, user_id: i64, trigger_type: &str) -> Result<Job, QueueError> {
        self.enqueue_new(NewJob::manual_sync(user_id, trigger_type)).await
    }

    pub async fn enqueue_new(&self, new_job: NewJob) -> Result<Job, QueueError> {
        let job = new_job.into_job();
        self.enqueue_job(&job).await?;
        Ok(job)
    }

    /// Appends an already-built job to the tail of the list.
    pub async fn enqueue_job(&self, job: &Job) -> Result<(), QueueError> {
        let payload = job.to_payload().map_err(QueueError::Encode)?;
        let cancel = CancellationToken::new();
        let (pool, queue, payload) = (&self.pool, self.queue.as_str(), &payload);

        let entry_id = retry(&cancel, &self.retry_cfg, "queue_enqueue", || async move {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO queue_entries (queue, payload)
                VALUES ($1, $2)
                RETURNING id
                "#,
            )
            .bind(queue)
            .bind(payload)
            .fetch_one(pool)
            .await?;
            Ok::<i64, QueueError>(id)
        })
        .await?;

        tracing::debug!(
            queue = %self.queue,
            entry_id,
            job_id = %job.id,
            trace_id = %job.trace_id,
            user_id = job.user_id,
            job_type = %job.job_type,
            "job enqueued"
        );
        Ok(())
    }

    // ----------------------------
    // Consumers
    // ----------------------------

    /// Removes the oldest entry, if any, in one statement.
    ///
    /// Correctness: SELECT ... FOR UPDATE SKIP LOCKED inside the DELETE, so
    /// two consumers never get the same row.
    pub async fn try_pop(&self) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"
            DELETE FROM queue_entries
            WHERE id = (
                SELECT id
                FROM queue_entries
                WHERE queue = $1
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(&self.queue)
        .fetch_optional(&self.pool)
        .await?;

        let Some((entry_id, payload)) = row else {
            return Ok(None);
        };

        let job = Job::from_payload(payload)
            .map_err(|source| QueueError::Decode { entry_id, source })?;
        Ok(Some(job))
    }

    /// Blocks until a job is popped or `wait` elapses.
    ///
    /// Cancellation is only observed between pops, so an entry that was
    /// removed is always returned to the caller.
    pub async fn dequeue_within(
        &self,
        cancel: &CancellationToken,
        wait: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(job) = self.try_pop().await? {
                return Ok(Some(job));
            }

            let now = Instant::now();
            if now >= deadline || cancel.is_cancelled() {
                return Ok(None);
            }

            let nap = POP_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    // ----------------------------
    // Status
    // ----------------------------

    pub async fn queue_length(&self) -> Result<i64, QueueError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE queue = $1")
            .bind(&self.queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl JobSource for QueueClient {
    async fn dequeue(
        &self,
        cancel: &CancellationToken,
        wait: Duration,
    ) -> Result<Option<Job>, QueueError> {
        self.dequeue_within(cancel, wait).await
    }

    async fn close(&self) {
        QueueClient::close(self).await;
    }
}
