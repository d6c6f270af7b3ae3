//! Job management endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduling::ActiveJob;
use crate::server::state::AppState;
use crate::types::{Job, JobPriority, Trigger};

/// POST /api/jobs - Enqueue a job
#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub job_type: String,
    /// Defaults to the configured ingest bucket.
    pub bucket: Option<String>,
    pub object_name: String,
    pub priority: Option<JobPriority>,
    /// Explicit triggers; defaults to the configured chain for the type.
    pub triggers: Option<Vec<Trigger>>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueJobResponse {
    pub job_id: Uuid,
    pub message: String,
}

pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueJobRequest>,
) -> Result<Json<EnqueueJobResponse>> {
    let bucket = request
        .bucket
        .unwrap_or_else(|| state.config().storage.bucket.clone());
    let triggers = request.triggers.unwrap_or_else(|| {
        state
            .config()
            .chains
            .get(&request.job_type)
            .cloned()
            .unwrap_or_default()
    });

    let mut job = Job::new(&request.job_type, bucket, request.object_name)
        .with_priority(request.priority.unwrap_or_default())
        .with_triggers(triggers);
    if let Some(metadata) = request.metadata {
        job.metadata = metadata;
    }

    let job_id = state.job_queue().enqueue(job)?;
    Ok(Json(EnqueueJobResponse {
        job_id,
        message: format!("Job queued. Use /api/jobs/{} to check progress.", job_id),
    }))
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub job_type: String,
    pub status: String,
    pub priority: String,
    pub bucket: String,
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<Uuid>,
    pub created_at: String,
}

fn summarize(job: &Job) -> JobSummary {
    JobSummary {
        job_id: job.id,
        job_type: job.job_type.clone(),
        status: format!("{:?}", job.status).to_lowercase(),
        priority: format!("{:?}", job.priority).to_lowercase(),
        bucket: job.bucket.clone(),
        object_name: job.object_name.clone(),
        chain_id: job.chain_id,
        created_at: job.created_at.to_rfc3339(),
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// GET /api/jobs - List all jobs with queue stats
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<JobSummary> = state.job_queue().list().iter().map(summarize).collect();
    let stats = state.job_queue().stats();
    Json(JobListResponse {
        jobs,
        total: stats.total,
        pending: stats.pending,
        processing: stats.processing,
        completed: stats.completed,
        failed: stats.failed,
        cancelled: stats.cancelled,
    })
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub depends_on: Vec<Uuid>,
    pub triggers: Vec<Trigger>,
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// GET /api/jobs/:id - Full job detail
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>> {
    let job = state
        .job_queue()
        .get(job_id)
        .ok_or(crate::error::Error::UnknownJob(job_id))?;
    Ok(Json(JobDetailResponse {
        summary: summarize(&job),
        depends_on: job.depends_on.clone(),
        triggers: job.triggers.clone(),
        metadata: job.metadata.clone(),
        result: job.result.clone(),
        started_at: job.started_at.map(|t| t.to_rfc3339()),
        completed_at: job.completed_at.map(|t| t.to_rfc3339()),
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// DELETE /api/jobs/:id - Cancel a pending job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>> {
    state.job_queue().cancel(job_id)?;
    Ok(Json(CancelJobResponse {
        job_id,
        status: "cancelled".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReprioritizeRequest {
    pub priority: JobPriority,
}

#[derive(Debug, Serialize)]
pub struct ReprioritizeResponse {
    pub job_id: Uuid,
    pub priority: String,
}

/// PUT /api/jobs/:id/priority - Move a pending job between tiers
pub async fn reprioritize_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<ReprioritizeRequest>,
) -> Result<Json<ReprioritizeResponse>> {
    state.job_queue().reprioritize(job_id, request.priority)?;
    Ok(Json(ReprioritizeResponse {
        job_id,
        priority: format!("{:?}", request.priority).to_lowercase(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ActiveJobsResponse {
    pub active: Vec<ActiveJob>,
    pub count: usize,
}

/// GET /api/jobs/active - Jobs currently held by workers
pub async fn active_jobs(State(state): State<AppState>) -> Json<ActiveJobsResponse> {
    let active = state.worker_pool().active_jobs();
    let count = active.len();
    Json(ActiveJobsResponse { active, count })
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ResizeResponse {
    pub worker_target: usize,
    pub workers_alive: usize,
    pub message: String,
}

/// PUT /api/workers - Resize the worker pool
pub async fn resize_workers(
    State(state): State<AppState>,
    Json(request): Json<ResizeRequest>,
) -> Json<ResizeResponse> {
    state.worker_pool().update_worker_count(request.count);
    let stats = state.worker_pool().stats();
    Json(ResizeResponse {
        worker_target: stats.worker_target,
        workers_alive: stats.workers_alive,
        message: "Growth is immediate; shrink converges as workers finish their current job."
            .to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: crate::scheduling::QueueStats,
    pub pool: crate::scheduling::PoolStats,
    pub watcher: serde_json::Value,
    pub events: EventStats,
}

#[derive(Debug, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub unprocessed: usize,
}

/// GET /api/stats - Queue, pool, watcher, and event log health
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        queue: state.job_queue().stats(),
        pool: state.worker_pool().stats(),
        watcher: serde_json::json!({ "state": state.detector().state() }),
        events: EventStats {
            total: state.event_store().len(),
            unprocessed: state.event_store().unprocessed_count(),
        },
    })
}
