//! Priority job queue with lifecycle bookkeeping
//!
//! One lock guards both the ordered structure and the status index, so
//! enqueue/status updates are atomic with respect to dequeue. Blocking is
//! done with semaphore permits (one per queued entry), never by polling.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Job, JobPriority, JobStatus};

/// Position of a queued job: higher priority pops first, FIFO within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    tier: u8,
    seq: u64,
}

fn tier(priority: JobPriority) -> u8 {
    match priority {
        JobPriority::High => 0,
        JobPriority::Medium => 1,
        JobPriority::Low => 2,
    }
}

struct IndexEntry {
    job: Job,
    /// Set while the job waits in the ordered map.
    key: Option<QueueKey>,
}

#[derive(Default)]
struct QueueInner {
    ordered: BTreeMap<QueueKey, Uuid>,
    /// Every job ever enqueued, with its current lifecycle state.
    index: HashMap<Uuid, IndexEntry>,
    next_seq: u64,
}

/// Counts of jobs by status.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub capacity: usize,
}

/// Thread-safe priority queue plus status index. Owns every job status
/// transition; the worker pool requests transitions through it.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// One permit per entry in the ordered map; closed on shutdown.
    slots: Semaphore,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            slots: Semaphore::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Insert a job, ordered `(priority desc, enqueue sequence asc)`.
    /// Rejects with [`Error::QueueFull`] once `capacity` jobs are waiting.
    pub fn enqueue(&self, mut job: Job) -> Result<Uuid> {
        let id = job.id;
        {
            let mut inner = self.inner.lock();
            if inner.ordered.len() >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            job.status = JobStatus::Pending;
            let key = QueueKey {
                tier: tier(job.priority),
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            inner.ordered.insert(key, id);
            inner.index.insert(id, IndexEntry { job, key: Some(key) });
        }
        self.slots.add_permits(1);
        tracing::debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    /// Remove and return the highest-priority oldest job, parking the caller
    /// until one is available. Returns None once the queue has shut down.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            match self.slots.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return None, // closed: shutting down
            }
            let mut inner = self.inner.lock();
            if let Some((_, id)) = inner.ordered.pop_first() {
                if let Some(entry) = inner.index.get_mut(&id) {
                    entry.key = None;
                    // cancellation races resolve to "never dispatched"
                    if entry.job.status == JobStatus::Pending {
                        return Some(entry.job.clone());
                    }
                }
            }
            // surplus permit left behind by a cancelled entry; park again
        }
    }

    /// Stop handing out jobs; parked and future `dequeue` calls return None.
    pub fn shutdown(&self) {
        self.slots.close();
        tracing::debug!("job queue shut down");
    }

    /// Transition a job's status. Unknown ids and invalid transitions are
    /// warnings, not errors: updates racing against cancellation are
    /// tolerated.
    pub fn update_status(&self, id: Uuid, status: JobStatus) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.index.get_mut(&id) else {
            tracing::warn!(job_id = %id, ?status, "status update for unknown job");
            return;
        };
        if !entry.job.status.can_transition_to(status) {
            tracing::warn!(
                job_id = %id,
                from = ?entry.job.status,
                to = ?status,
                "ignoring invalid status transition"
            );
            return;
        }
        entry.job.status = status;
        let now = chrono::Utc::now();
        match status {
            JobStatus::Processing => entry.job.started_at = Some(now),
            s if s.is_terminal() => entry.job.completed_at = Some(now),
            _ => {}
        }
    }

    /// Record the structured outcome payload for a job.
    pub fn set_result(&self, id: Uuid, result: serde_json::Value) {
        let mut inner = self.inner.lock();
        match inner.index.get_mut(&id) {
            Some(entry) => entry.job.result = Some(result),
            None => tracing::warn!(job_id = %id, "result for unknown job"),
        }
    }

    /// Cancel a Pending job and drop it from the ordered structure.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner
            .index
            .get_mut(&id)
            .ok_or(Error::UnknownJob(id))?;
        if entry.job.status != JobStatus::Pending {
            return Err(Error::JobNotPending {
                id,
                status: entry.job.status,
            });
        }
        entry.job.status = JobStatus::Cancelled;
        entry.job.completed_at = Some(chrono::Utc::now());
        if let Some(key) = entry.key.take() {
            inner.ordered.remove(&key);
        }
        tracing::info!(job_id = %id, "job cancelled");
        Ok(())
    }

    /// Move a Pending job to a different priority tier, keeping its original
    /// enqueue sequence.
    pub fn reprioritize(&self, id: Uuid, priority: JobPriority) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner
            .index
            .get_mut(&id)
            .ok_or(Error::UnknownJob(id))?;
        if entry.job.status != JobStatus::Pending {
            return Err(Error::JobNotPending {
                id,
                status: entry.job.status,
            });
        }
        entry.job.priority = priority;
        if let Some(old_key) = entry.key {
            let new_key = QueueKey {
                tier: tier(priority),
                seq: old_key.seq,
            };
            entry.key = Some(new_key);
            inner.ordered.remove(&old_key);
            inner.ordered.insert(new_key, id);
        }
        tracing::info!(job_id = %id, ?priority, "job reprioritized");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.lock().index.get(&id).map(|e| e.job.clone())
    }

    /// Snapshot of every known job, newest first.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner.index.values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of jobs currently waiting in the ordered structure.
    pub fn queued_len(&self) -> usize {
        self.inner.lock().ordered.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats {
            total: inner.index.len(),
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            capacity: self.capacity,
        };
        for entry in inner.index.values() {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: JobPriority) -> Job {
        Job::new("parse", "inbox", "drop/data.csv").with_priority(priority)
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = JobQueue::new(10);
        let a = queue.enqueue(job(JobPriority::Low)).unwrap();
        let b = queue.enqueue(job(JobPriority::High)).unwrap();
        let c = queue.enqueue(job(JobPriority::Medium)).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().id, b);
        assert_eq!(queue.dequeue().await.unwrap().id, c);
        assert_eq!(queue.dequeue().await.unwrap().id, a);
    }

    #[tokio::test]
    async fn test_fifo_within_tier() {
        let queue = JobQueue::new(10);
        let x = queue.enqueue(job(JobPriority::High)).unwrap();
        let y = queue.enqueue(job(JobPriority::High)).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().id, x);
        assert_eq!(queue.dequeue().await.unwrap().id, y);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_but_does_not_corrupt() {
        let queue = JobQueue::new(2);
        queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.enqueue(job(JobPriority::Medium)).unwrap();

        let err = queue.enqueue(job(JobPriority::High)).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));

        // queue keeps functioning after the rejection
        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        queue.enqueue(job(JobPriority::Low)).unwrap();
        assert_eq!(queue.queued_len(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        let queue = std::sync::Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let id = queue.enqueue(job(JobPriority::Medium)).unwrap();
        let dequeued = waiter.await.unwrap().unwrap();
        assert_eq!(dequeued.id, id);
    }

    #[tokio::test]
    async fn test_shutdown_releases_blocked_workers() {
        let queue = std::sync::Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.shutdown();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_job_is_never_dequeued() {
        let queue = JobQueue::new(10);
        let first = queue.enqueue(job(JobPriority::Medium)).unwrap();
        let second = queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.cancel(first).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().id, second);
        assert_eq!(queue.get(first).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_non_pending_rejected() {
        let queue = JobQueue::new(10);
        let id = queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.dequeue().await.unwrap();
        queue.update_status(id, JobStatus::Processing);

        let err = queue.cancel(id).unwrap_err();
        assert!(matches!(err, Error::JobNotPending { .. }));
        assert!(matches!(
            queue.cancel(Uuid::new_v4()).unwrap_err(),
            Error::UnknownJob(_)
        ));
    }

    #[tokio::test]
    async fn test_reprioritize_overtakes_old_tier() {
        let queue = JobQueue::new(10);
        let slow = queue.enqueue(job(JobPriority::Medium)).unwrap();
        let bumped = queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.reprioritize(bumped, JobPriority::High).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().id, bumped);
        assert_eq!(queue.dequeue().await.unwrap().id, slow);
    }

    #[tokio::test]
    async fn test_status_index_and_stats() {
        let queue = JobQueue::new(10);
        let id = queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.enqueue(job(JobPriority::Medium)).unwrap();

        queue.dequeue().await.unwrap();
        queue.update_status(id, JobStatus::Processing);
        let stats = queue.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);

        queue.update_status(id, JobStatus::Completed);
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert!(queue.get(id).unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_and_unknown_updates_are_tolerated() {
        let queue = JobQueue::new(10);
        let id = queue.enqueue(job(JobPriority::Medium)).unwrap();

        // unknown id: warn, no-op
        queue.update_status(Uuid::new_v4(), JobStatus::Completed);
        // invalid transition: Pending -> Completed skips Processing
        queue.update_status(id, JobStatus::Completed);
        assert_eq!(queue.get(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_jobs_keep_result() {
        let queue = JobQueue::new(10);
        let id = queue.enqueue(job(JobPriority::Medium)).unwrap();
        queue.dequeue().await.unwrap();
        queue.update_status(id, JobStatus::Processing);
        queue.set_result(id, serde_json::json!({"rows": 42}));
        queue.update_status(id, JobStatus::Completed);

        let job = queue.get(id).unwrap();
        assert_eq!(job.result.unwrap()["rows"], 42);
    }
}
