//! API routes for the pipeline server

pub mod events;
pub mod files;
pub mod jobs;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Job management
        .route("/jobs", post(jobs::enqueue_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/active", get(jobs::active_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id", delete(jobs::cancel_job))
        .route("/jobs/:id/priority", put(jobs::reprioritize_job))
        // Pool control and observability
        .route("/workers", put(jobs::resize_workers))
        .route("/stats", get(jobs::stats))
        // File events
        .route("/events", get(events::history))
        .route("/events/unprocessed", get(events::unprocessed))
        .route("/events/:id/processed", post(events::mark_processed))
        // Objects - with larger body limit for uploads
        .route(
            "/files",
            post(files::upload_files).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/files", get(files::list_files))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "conveyor",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Object-store ingestion pipeline with priority job orchestration",
        "endpoints": {
            "POST /api/jobs": "Enqueue a job",
            "GET /api/jobs": "List jobs and queue stats",
            "GET /api/jobs/:id": "Get job detail",
            "DELETE /api/jobs/:id": "Cancel a pending job",
            "PUT /api/jobs/:id/priority": "Reprioritize a pending job",
            "GET /api/jobs/active": "Jobs currently held by workers",
            "PUT /api/workers": "Resize the worker pool",
            "GET /api/stats": "Queue, pool, watcher, and event stats",
            "GET /api/events": "Recent file events",
            "GET /api/events/unprocessed": "Unacknowledged file events",
            "POST /api/events/:id/processed": "Acknowledge a file event",
            "POST /api/files": "Upload objects into the watched bucket",
            "GET /api/files": "List the watched bucket"
        },
        "pipeline": {
            "watcher": "Polls the bucket and turns created objects into jobs",
            "chaining": "decompress -> parse -> export by default",
            "backpressure": "Enqueues beyond queue capacity are rejected"
        }
    }))
}
