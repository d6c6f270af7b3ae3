//! File event endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::server::state::AppState;
use crate::types::FileEvent;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub event_time: String,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

fn render(event: &FileEvent) -> EventResponse {
    EventResponse {
        id: event.id,
        event_type: format!("{:?}", event.event_type).to_lowercase(),
        bucket: event.bucket.clone(),
        key: event.key.clone(),
        size: event.size,
        etag: event.etag.clone(),
        event_time: event.event_time.to_rfc3339(),
        processed: event.processed,
        processed_at: event.processed_at.map(|t| t.to_rfc3339()),
    }
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<EventResponse>,
    pub count: usize,
}

const DEFAULT_LIMIT: usize = 100;

/// GET /api/events - Most-recent events, processed or not
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<EventListResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let events: Vec<EventResponse> = state
        .event_store()
        .history(Some(limit))
        .iter()
        .map(render)
        .collect();
    let count = events.len();
    Json(EventListResponse { events, count })
}

/// GET /api/events/unprocessed - Oldest-first backlog
pub async fn unprocessed(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<EventListResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let events: Vec<EventResponse> = state
        .event_store()
        .unprocessed(Some(limit))
        .iter()
        .map(render)
        .collect();
    let count = events.len();
    Json(EventListResponse { events, count })
}

#[derive(Debug, Serialize)]
pub struct MarkProcessedResponse {
    pub id: Uuid,
    pub processed: bool,
}

/// POST /api/events/:id/processed - Idempotent acknowledgement
pub async fn mark_processed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<MarkProcessedResponse> {
    state.event_store().mark_processed(id);
    Json(MarkProcessedResponse {
        id,
        processed: true,
    })
}
