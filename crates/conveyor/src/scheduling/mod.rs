//! Job orchestration core: queue, worker pool, trigger chaining

pub mod chain;
pub mod job_queue;
pub mod registry;
pub mod worker_pool;

pub use job_queue::{JobQueue, QueueStats};
pub use registry::{JobProcessor, ProcessorRegistry};
pub use worker_pool::{ActiveJob, PoolStats, WorkerPool};
