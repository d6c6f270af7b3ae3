//! Worker pool: concurrent job execution with trigger chaining
//!
//! Workers share one cancellation token and stop cooperatively. Shrinking
//! the pool is advisory; excess workers retire between jobs, so convergence
//! to a smaller target is eventual, never preemptive.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduling::chain;
use crate::scheduling::job_queue::JobQueue;
use crate::scheduling::registry::ProcessorRegistry;
use crate::types::{Job, JobResult, JobStatus, Trigger};

/// One entry in the pool's transient active-jobs index.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJob {
    pub job_id: Uuid,
    pub job_type: String,
    pub bucket: String,
    pub object_name: String,
    pub worker: usize,
    pub started_at: DateTime<Utc>,
}

/// Pool health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// False once the shared cancellation token has fired.
    pub running: bool,
    pub worker_target: usize,
    pub workers_alive: usize,
    pub active_jobs: usize,
}

/// Everything a worker loop needs, cloneable into the spawned task.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<JobQueue>,
    registry: Arc<ProcessorRegistry>,
    default_chains: Arc<HashMap<String, Vec<Trigger>>>,
    active: Arc<DashMap<Uuid, ActiveJob>>,
    token: CancellationToken,
    target: Arc<AtomicUsize>,
    alive: Arc<AtomicUsize>,
}

/// A resizable set of workers pulling from the shared queue. At most one
/// worker ever holds a given job: `dequeue` removes it from the queue before
/// any worker sees it.
pub struct WorkerPool {
    ctx: WorkerContext,
    next_worker_id: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<ProcessorRegistry>,
        default_chains: Arc<HashMap<String, Vec<Trigger>>>,
        worker_count: usize,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                queue,
                registry,
                default_chains,
                active: Arc::new(DashMap::new()),
                token: CancellationToken::new(),
                target: Arc::new(AtomicUsize::new(worker_count.max(1))),
                alive: Arc::new(AtomicUsize::new(0)),
            },
            next_worker_id: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn workers up to the configured target.
    pub fn start(&self) {
        let target = self.ctx.target.load(Ordering::SeqCst);
        while self.ctx.alive.load(Ordering::SeqCst) < target {
            self.spawn_worker();
        }
        tracing::info!(workers = target, "worker pool started");
    }

    fn spawn_worker(&self) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        self.ctx.alive.fetch_add(1, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(worker_loop(worker_id, ctx));
        self.handles.lock().push(handle);
    }

    /// Resize the pool. Growth spawns workers immediately; shrinking lets
    /// excess workers retire after their current job.
    pub fn update_worker_count(&self, count: usize) {
        let count = count.max(1);
        let previous = self.ctx.target.swap(count, Ordering::SeqCst);
        tracing::info!(from = previous, to = count, "worker target updated");
        while self.ctx.alive.load(Ordering::SeqCst) < count {
            self.spawn_worker();
        }
    }

    /// Signal cancellation, shut the queue down, and wait for every
    /// in-flight `process` call to return.
    pub async fn stop(&self) {
        self.ctx.token.cancel();
        self.ctx.queue.shutdown();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("worker pool stopped");
    }

    /// Jobs currently being executed, most recent first.
    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<ActiveJob> = self
            .ctx
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    pub fn is_running(&self) -> bool {
        !self.ctx.token.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.is_running(),
            worker_target: self.ctx.target.load(Ordering::SeqCst),
            workers_alive: self.ctx.alive.load(Ordering::SeqCst),
            active_jobs: self.ctx.active.len(),
        }
    }
}

/// Retire if the pool is above target, decrementing `alive` atomically so
/// concurrent retirements never drop below the target.
fn try_retire(alive: &AtomicUsize, target: &AtomicUsize) -> bool {
    loop {
        let current = alive.load(Ordering::SeqCst);
        if current <= target.load(Ordering::SeqCst) {
            return false;
        }
        if alive
            .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    tracing::debug!(worker_id, "worker started");
    loop {
        if try_retire(&ctx.alive, &ctx.target) {
            tracing::debug!(worker_id, "worker retired (pool shrank)");
            return;
        }
        let job = tokio::select! {
            _ = ctx.token.cancelled() => break,
            job = ctx.queue.dequeue() => match job {
                Some(job) => job,
                None => break, // queue shut down
            },
        };
        run_job(worker_id, &ctx, job).await;
    }
    ctx.alive.fetch_sub(1, Ordering::SeqCst);
    tracing::debug!(worker_id, "worker stopped");
}

async fn run_job(worker_id: usize, ctx: &WorkerContext, job: Job) {
    let job_id = job.id;
    ctx.queue.update_status(job_id, JobStatus::Processing);
    ctx.active.insert(
        job_id,
        ActiveJob {
            job_id,
            job_type: job.job_type.clone(),
            bucket: job.bucket.clone(),
            object_name: job.object_name.clone(),
            worker: worker_id,
            started_at: Utc::now(),
        },
    );
    tracing::info!(worker_id, job_id = %job_id, job_type = %job.job_type, "processing job");

    let result = execute(ctx, &job).await;
    let outcome = if result.success {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };

    ctx.queue.set_result(
        job_id,
        serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
    );
    ctx.queue.update_status(job_id, outcome);
    ctx.active.remove(&job_id);

    match outcome {
        JobStatus::Completed => {
            tracing::info!(job_id = %job_id, detail = %result.message, "job completed")
        }
        _ => tracing::warn!(job_id = %job_id, detail = %result.message, "job failed"),
    }

    for child in chain::plan_children(&job, outcome, &result, &ctx.default_chains) {
        let child_id = child.id;
        let child_type = child.job_type.clone();
        match ctx.queue.enqueue(child) {
            Ok(_) => tracing::info!(
                parent = %job_id,
                child = %child_id,
                job_type = %child_type,
                "chained follow-up job"
            ),
            // best-effort: the parent's terminal status stands
            Err(e) => tracing::warn!(parent = %job_id, error = %e, "dropping chained job"),
        }
    }
}

/// Run the processor, containing errors and panics at the worker boundary.
async fn execute(ctx: &WorkerContext, job: &Job) -> JobResult {
    let Some(processor) = ctx.registry.get(&job.job_type) else {
        return JobResult::error(format!(
            "no processor registered for job type '{}'",
            job.job_type
        ));
    };
    match AssertUnwindSafe(processor.process(&ctx.token, job))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => JobResult::error(e.to_string()),
        Err(panic) => {
            let message = panic_message(panic);
            tracing::error!(job_id = %job.id, panic = %message, "processor panicked");
            JobResult::error(format!("processor panicked: {}", message))
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::scheduling::registry::JobProcessor;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Succeed;

    #[async_trait]
    impl JobProcessor for Succeed {
        async fn process(&self, _ctx: &CancellationToken, _job: &Job) -> Result<JobResult> {
            Ok(JobResult::ok("done"))
        }
    }

    struct Fail;

    #[async_trait]
    impl JobProcessor for Fail {
        async fn process(&self, _ctx: &CancellationToken, _job: &Job) -> Result<JobResult> {
            Ok(JobResult::error("boom"))
        }
    }

    struct Panic;

    #[async_trait]
    impl JobProcessor for Panic {
        async fn process(&self, _ctx: &CancellationToken, _job: &Job) -> Result<JobResult> {
            panic!("deliberate test panic");
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl JobProcessor for Slow {
        async fn process(&self, _ctx: &CancellationToken, _job: &Job) -> Result<JobResult> {
            tokio::time::sleep(self.0).await;
            Ok(JobResult::ok("slow done"))
        }
    }

    /// Records one (id, start, end) span per processed job.
    struct Recording {
        spans: Arc<Mutex<Vec<(Uuid, std::time::Instant, std::time::Instant)>>>,
    }

    #[async_trait]
    impl JobProcessor for Recording {
        async fn process(&self, _ctx: &CancellationToken, job: &Job) -> Result<JobResult> {
            let start = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.spans.lock().push((job.id, start, std::time::Instant::now()));
            Ok(JobResult::ok("recorded"))
        }
    }

    fn pool_with(
        queue: Arc<JobQueue>,
        entries: Vec<(&str, Arc<dyn JobProcessor>)>,
        chains: HashMap<String, Vec<Trigger>>,
        workers: usize,
    ) -> WorkerPool {
        let mut registry = ProcessorRegistry::new();
        for (job_type, processor) in entries {
            registry.register(job_type, processor);
        }
        WorkerPool::new(queue, Arc::new(registry), Arc::new(chains), workers)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_jobs_complete_and_stats_settle() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![("parse", Arc::new(Succeed) as Arc<dyn JobProcessor>)],
            HashMap::new(),
            2,
        );
        pool.start();

        for _ in 0..5 {
            queue.enqueue(Job::new("parse", "inbox", "a.csv")).unwrap();
        }
        wait_until(|| queue.stats().completed == 5).await;
        assert_eq!(pool.stats().active_jobs, 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_chaining_on_success_end_to_end() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![
                ("decompress", Arc::new(Succeed) as Arc<dyn JobProcessor>),
                ("parse", Arc::new(Succeed) as Arc<dyn JobProcessor>),
            ],
            HashMap::new(),
            1,
        );
        pool.start();

        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_trigger(Trigger::on_success("parse"));
        let parent_id = queue.enqueue(parent).unwrap();

        wait_until(|| queue.stats().completed == 2).await;

        let jobs = queue.list();
        let child = jobs
            .iter()
            .find(|j| j.depends_on.contains(&parent_id))
            .expect("chained child exists");
        assert_eq!(child.job_type, "parse");
        assert_eq!(child.chain_id, Some(parent_id));
        assert_eq!(child.metadata["parent_job_id"], parent_id.to_string());
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_on_failure_trigger_ignored_on_success() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![("decompress", Arc::new(Succeed) as Arc<dyn JobProcessor>)],
            HashMap::new(),
            1,
        );
        pool.start();

        let parent = Job::new("decompress", "inbox", "drop/a.zip")
            .with_trigger(Trigger::on_failure("parse"));
        queue.enqueue(parent).unwrap();

        wait_until(|| queue.stats().completed == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.list().len(), 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_failure_chains_on_failure_trigger() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![
                ("parse", Arc::new(Fail) as Arc<dyn JobProcessor>),
                ("notify", Arc::new(Succeed) as Arc<dyn JobProcessor>),
            ],
            HashMap::new(),
            1,
        );
        pool.start();

        let parent =
            Job::new("parse", "inbox", "drop/a.csv").with_trigger(Trigger::on_failure("notify"));
        let parent_id = queue.enqueue(parent).unwrap();

        wait_until(|| {
            let stats = queue.stats();
            stats.failed == 1 && stats.completed == 1
        })
        .await;

        let parent = queue.get(parent_id).unwrap();
        assert_eq!(parent.status, JobStatus::Failed);
        assert_eq!(parent.result.as_ref().unwrap()["success"], false);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_at_most_one_execution_per_job() {
        let queue = Arc::new(JobQueue::new(100));
        let spans = Arc::new(Mutex::new(Vec::new()));
        let pool = pool_with(
            queue.clone(),
            vec![(
                "parse",
                Arc::new(Recording { spans: spans.clone() }) as Arc<dyn JobProcessor>,
            )],
            HashMap::new(),
            4,
        );
        pool.start();

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(queue.enqueue(Job::new("parse", "inbox", "a.csv")).unwrap());
        }
        wait_until(|| queue.stats().completed == 20).await;

        let spans = spans.lock();
        assert_eq!(spans.len(), 20);
        let mut seen: Vec<Uuid> = spans.iter().map(|(id, _, _)| *id).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20, "every job ran exactly once");
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_panic_contained_and_worker_survives() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![
                ("explode", Arc::new(Panic) as Arc<dyn JobProcessor>),
                ("parse", Arc::new(Succeed) as Arc<dyn JobProcessor>),
            ],
            HashMap::new(),
            1,
        );
        pool.start();

        let bad = queue.enqueue(Job::new("explode", "inbox", "a")).unwrap();
        let good = queue.enqueue(Job::new("parse", "inbox", "b")).unwrap();

        wait_until(|| {
            let stats = queue.stats();
            stats.failed == 1 && stats.completed == 1
        })
        .await;

        let failed = queue.get(bad).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let message = failed.result.unwrap()["message"].as_str().unwrap().to_string();
        assert!(message.contains("panicked"));
        assert_eq!(queue.get(good).unwrap().status, JobStatus::Completed);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_job() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(queue.clone(), vec![], HashMap::new(), 1);
        pool.start();

        let id = queue.enqueue(Job::new("mystery", "inbox", "a")).unwrap();
        wait_until(|| queue.stats().failed == 1).await;

        let job = queue.get(id).unwrap();
        let message = job.result.unwrap()["message"].as_str().unwrap().to_string();
        assert!(message.contains("no processor registered"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_graceful_shutdown_waits_for_in_flight() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![("parse", Arc::new(Slow(Duration::from_millis(150))) as Arc<dyn JobProcessor>)],
            HashMap::new(),
            1,
        );
        pool.start();

        let first = queue.enqueue(Job::new("parse", "inbox", "a")).unwrap();
        let second = queue.enqueue(Job::new("parse", "inbox", "b")).unwrap();
        wait_until(|| queue.stats().processing == 1).await;

        pool.stop().await;

        // in-flight work finished; queued work was never started
        assert_eq!(queue.get(first).unwrap().status, JobStatus::Completed);
        assert_eq!(queue.get(second).unwrap().status, JobStatus::Pending);
        assert_eq!(queue.stats().processing, 0);
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_pool_growth_and_shrink_by_attrition() {
        let queue = Arc::new(JobQueue::new(100));
        let pool = pool_with(
            queue.clone(),
            vec![("parse", Arc::new(Succeed) as Arc<dyn JobProcessor>)],
            HashMap::new(),
            1,
        );
        pool.start();
        assert_eq!(pool.stats().workers_alive, 1);

        pool.update_worker_count(3);
        assert_eq!(pool.stats().workers_alive, 3);
        assert_eq!(pool.stats().worker_target, 3);

        // shrink is advisory: target drops immediately, workers retire as
        // they pass through the loop
        pool.update_worker_count(1);
        assert_eq!(pool.stats().worker_target, 1);
        for _ in 0..5 {
            queue.enqueue(Job::new("parse", "inbox", "a.csv")).unwrap();
        }
        wait_until(|| queue.stats().completed == 5).await;
        wait_until(|| pool.stats().workers_alive <= 1).await;
        pool.stop().await;
    }
}
