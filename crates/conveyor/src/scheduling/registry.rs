//! Processor registry: job type tags resolved to implementations at dispatch

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{Job, JobResult};

/// Pluggable per-type transformation logic. One implementation per job type,
/// supplied by the surrounding application.
///
/// Long-running implementations must observe `ctx` cooperatively; the pool
/// never forcibly kills work.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> Result<JobResult>;
}

/// Maps job type tags to processors. Built at startup, immutable afterwards;
/// adding a job type means registering an implementation, not branching on
/// type strings inside the pool.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, processor: Arc<dyn JobProcessor>) {
        let job_type = job_type.into();
        if self.processors.insert(job_type.clone(), processor).is_some() {
            tracing::warn!(job_type, "replacing existing processor registration");
        }
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobProcessor>> {
        self.processors.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobProcessor for Noop {
        async fn process(&self, _ctx: &CancellationToken, _job: &Job) -> Result<JobResult> {
            Ok(JobResult::ok("noop"))
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ProcessorRegistry::new();
        registry.register("decompress", Arc::new(Noop));
        registry.register("parse", Arc::new(Noop));

        assert!(registry.get("decompress").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.job_types(), vec!["decompress", "parse"]);
    }
}
