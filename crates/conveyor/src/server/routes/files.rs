//! Object upload and listing endpoints

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::providers::list_all;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub key: String,
    pub size: u64,
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub bucket: String,
    pub files: Vec<UploadedFile>,
    pub message: String,
}

/// POST /api/files - Upload objects into the watched bucket. The watcher
/// picks them up on its next poll; nothing is enqueued here.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let bucket = state.config().storage.bucket.clone();
    let prefix = &state.config().watcher.prefix;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::internal(format!("Failed to read multipart field: {}", e)))?
    {
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let content_type = mime_guess::from_path(&filename).first_or_octet_stream();

        let data = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracing::warn!(filename, error = %e, "failed to read upload");
                continue;
            }
        };

        let key = format!("{}{}", prefix, filename);
        tracing::info!(key, size = data.len(), %content_type, "object uploaded");
        let meta = state.object_store().put(&bucket, &key, data).await?;
        files.push(UploadedFile {
            key: meta.key,
            size: meta.size,
            etag: meta.etag,
        });
    }

    if files.is_empty() {
        return Err(Error::internal("No files provided".to_string()));
    }

    let count = files.len();
    Ok(Json(UploadResponse {
        bucket,
        files,
        message: format!("{} object(s) stored; the watcher will pick them up.", count),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub bucket: String,
    pub objects: Vec<crate::providers::ObjectMeta>,
    pub count: usize,
}

/// GET /api/files - List the watched bucket
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<FileListResponse>> {
    let bucket = state.config().storage.bucket.clone();
    let prefix = params.prefix.unwrap_or_default();
    let objects = list_all(state.object_store().as_ref(), &bucket, &prefix).await?;
    let count = objects.len();
    Ok(Json(FileListResponse {
        bucket,
        objects,
        count,
    }))
}
