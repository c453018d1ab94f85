pub mod error_codes;
pub mod model;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod retry;

pub use error_codes::{ErrorCode, JobError};
pub use model::{Job, JobType, NewJob};
pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use processor::{JobProcessor, ProcessorRegistry};
pub use queue::{JobSource, QueueClient, QueueError, DEFAULT_QUEUE_NAME};
pub use retry::{retry, retry_fixed, RetryConfig, RetryError};
