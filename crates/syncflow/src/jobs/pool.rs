//! Fixed-size pool of worker loops draining a [`JobSource`].
//!
//! Each worker holds at most one job at a time: it polls, dispatches to the
//! first matching [`JobProcessor`](crate::jobs::processor::JobProcessor),
//! records the outcome and goes back to polling. Failures never leave the
//! worker loop; they are logged with the job's identity and counted.

use crate::jobs::error_codes::{suggested_action, ErrorCode, JobError};
use crate::jobs::model::Job;
use crate::jobs::processor::ProcessorRegistry;
use crate::jobs::queue::{JobSource, QueueError};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const DEFAULT_WORKER_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 0 falls back to [`DEFAULT_WORKER_COUNT`].
    pub worker_count: usize,
    /// Upper bound on one blocking dequeue, so stop is observed promptly.
    pub dequeue_wait: Duration,
    /// Pause after an empty or failed dequeue.
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            dequeue_wait: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            DEFAULT_WORKER_COUNT
        } else {
            self.worker_count
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub active_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool already started")]
    AlreadyStarted,
    #[error("worker pool is stopped")]
    Stopped,
}

struct Shared<Q> {
    source: Arc<Q>,
    registry: ProcessorRegistry,
    cfg: PoolConfig,
    stats: Mutex<PoolStats>,
    cancel: CancellationToken,
}

struct Lifecycle {
    state: PoolState,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool<Q: JobSource> {
    shared: Arc<Shared<Q>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<Q: JobSource> WorkerPool<Q> {
    pub fn new(source: Arc<Q>, registry: ProcessorRegistry, cfg: PoolConfig) -> Self {
        if registry.is_empty() {
            tracing::warn!("worker pool created without processors; every job will fail");
        }

        Self {
            shared: Arc::new(Shared {
                source,
                registry,
                cfg,
                stats: Mutex::new(PoolStats::default()),
                cancel: CancellationToken::new(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: PoolState::Idle,
                handles: Vec::new(),
            }),
        }
    }

    /// Spawns the worker loops. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match lifecycle.state {
            PoolState::Running => return Err(PoolError::AlreadyStarted),
            PoolState::Stopped => return Err(PoolError::Stopped),
            PoolState::Idle => {}
        }

        let worker_count = self.shared.cfg.effective_worker_count();
        for worker_id in 0..worker_count {
            let shared = self.shared.clone();
            lifecycle
                .handles
                .push(tokio::spawn(run_worker(shared, worker_id)));
        }
        lifecycle.state = PoolState::Running;

        tracing::info!(
            workers = worker_count,
            processors = self.shared.registry.len(),
            poll_interval_ms = self.shared.cfg.poll_interval.as_millis() as u64,
            "worker pool started"
        );
        Ok(())
    }

    /// Signals every worker, waits for in-flight jobs to finish, then closes
    /// the job source. Later calls return immediately.
    pub async fn stop(&self) {
        let handles = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.state == PoolState::Stopped {
                return;
            }
            lifecycle.state = PoolState::Stopped;
            std::mem::take(&mut lifecycle.handles)
        };

        tracing::info!(workers = handles.len(), "worker pool stopping");
        self.shared.cancel.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }

        self.shared.source.close().await;

        let stats = self.stats();
        tracing::info!(
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            "worker pool stopped"
        );
    }

    pub fn stats(&self) -> PoolStats {
        *self
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PoolState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    pub fn worker_count(&self) -> usize {
        self.shared.cfg.effective_worker_count()
    }
}

impl<Q> Shared<Q> {
    fn update_stats(&self, f: impl FnOnce(&mut PoolStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    fn record_outcome(&self, succeeded: bool) {
        self.update_stats(|s| {
            if succeeded {
                s.jobs_processed += 1;
            } else {
                s.jobs_failed += 1;
            }
        });
    }
}

async fn run_worker<Q: JobSource>(shared: Arc<Shared<Q>>, worker_id: usize) {
    shared.update_stats(|s| s.active_workers += 1);
    tracing::debug!(worker = worker_id, "worker polling");

    while !shared.cancel.is_cancelled() {
        match shared
            .source
            .dequeue(&shared.cancel, shared.cfg.dequeue_wait)
            .await
        {
            Ok(Some(job)) => {
                dispatch(&shared, worker_id, job).await;
                continue;
            }
            Ok(None) => {}
            Err(QueueError::Cancelled) => break,
            Err(e @ QueueError::Decode { .. }) => {
                // Already removed from the queue; nothing to hand back.
                tracing::error!(
                    worker = worker_id,
                    error = %e,
                    code = %ErrorCode::BadPayload,
                    action = suggested_action(ErrorCode::BadPayload),
                    "dropping undecodable queue entry"
                );
                shared.record_outcome(false);
            }
            Err(e) => {
                tracing::warn!(
                    worker = worker_id,
                    error = %e,
                    code = %ErrorCode::Transport,
                    action = suggested_action(ErrorCode::Transport),
                    "dequeue failed"
                );
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.cfg.poll_interval) => {}
        }
    }

    shared.update_stats(|s| s.active_workers = s.active_workers.saturating_sub(1));
    tracing::debug!(worker = worker_id, "worker stopped");
}

async fn dispatch<Q>(shared: &Shared<Q>, worker_id: usize, job: Job) {
    let span = tracing::info_span!(
        "job",
        worker = worker_id,
        job_id = %job.id,
        user_id = job.user_id,
        trace_id = %job.trace_id,
        job_type = %job.job_type,
    );

    async {
        let started = Instant::now();
        let result = AssertUnwindSafe(run_job(shared, &job))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(JobError::from_panic(payload)));

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                tracing::info!(latency_ms, "job processed");
                shared.record_outcome(true);
            }
            Err(err) => {
                tracing::error!(
                    latency_ms,
                    code = %err.code,
                    error = %err.message,
                    action = suggested_action(err.code),
                    "job failed"
                );
                shared.record_outcome(false);
            }
        }
    }
    .instrument(span)
    .await
}

/// Lookup and processing both run inside the caller's panic boundary.
async fn run_job<Q>(shared: &Shared<Q>, job: &Job) -> Result<(), JobError> {
    let Some(processor) = shared.registry.processor_for(job.job_type) else {
        return Err(JobError::new(
            ErrorCode::UnknownJobType,
            format!("no processor registered for job type {}", job.job_type),
        ));
    };

    tracing::info!(
        processor = processor.name(),
        age_ms = job.age().num_milliseconds(),
        "processing job"
    );
    processor.process(job, &shared.cancel).await
}
