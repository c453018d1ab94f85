use crate::jobs::error_codes::JobError;
use crate::jobs::model::{Job, JobType};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A handler for one or more job types.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Used in logs.
    fn name(&self) -> &'static str;

    fn can_process(&self, job_type: JobType) -> bool;

    async fn process(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError>;
}

/// Processors in registration order. The first one that accepts a job type
/// wins.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) {
        self.processors.push(processor);
    }

    pub fn with(mut self, processor: Arc<dyn JobProcessor>) -> Self {
        self.register(processor);
        self
    }

    pub fn processor_for(&self, job_type: JobType) -> Option<&Arc<dyn JobProcessor>> {
        self.processors.iter().find(|p| p.can_process(job_type))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
