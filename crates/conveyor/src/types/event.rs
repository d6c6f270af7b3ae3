//! File change events detected by the watcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of change observed between two poll snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventType {
    Created,
    Removed,
    Modified,
}

/// A detected change to one object in the watched store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    pub id: Uuid,
    pub event_type: FileEventType,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub event_time: DateTime<Utc>,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileEvent {
    pub fn new(
        event_type: FileEventType,
        bucket: impl Into<String>,
        key: impl Into<String>,
        size: u64,
        etag: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            bucket: bucket.into(),
            key: key.into(),
            size,
            etag: etag.into(),
            event_time: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }

    /// Dedup identity: two poll cycles observing the same unchanged object
    /// never produce a second record.
    pub fn identity(&self) -> (String, String, String, FileEventType) {
        (
            self.bucket.clone(),
            self.key.clone(),
            self.etag.clone(),
            self.event_type,
        )
    }
}
