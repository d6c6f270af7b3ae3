//! Append-only record of detected file events

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::types::{FileEvent, FileEventType};

type EventIdentity = (String, String, String, FileEventType);

#[derive(Default)]
struct StoreInner {
    /// Insertion-ordered log.
    events: Vec<FileEvent>,
    /// Identities already recorded, for idempotent appends.
    seen: HashSet<EventIdentity>,
    /// Event id -> index into `events`.
    by_id: HashMap<Uuid, usize>,
}

/// In-memory event log with an unprocessed/processed partition. Owns all
/// FileEvent persistence; no capacity limit by default.
#[derive(Default)]
pub struct EventStore {
    inner: Mutex<StoreInner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Returns false when an event with the same identity
    /// `(bucket, key, etag, event_type)` was already recorded.
    pub fn append(&self, event: FileEvent) -> bool {
        let mut inner = self.inner.lock();
        let identity = event.identity();
        if !inner.seen.insert(identity) {
            tracing::debug!(key = %event.key, ?event.event_type, "duplicate event skipped");
            return false;
        }
        let index = inner.events.len();
        inner.by_id.insert(event.id, index);
        inner.events.push(event);
        true
    }

    /// Events not yet marked processed, in insertion order.
    pub fn unprocessed(&self, limit: Option<usize>) -> Vec<FileEvent> {
        let inner = self.inner.lock();
        inner
            .events
            .iter()
            .filter(|e| !e.processed)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Most-recent events regardless of processed flag.
    pub fn history(&self, limit: Option<usize>) -> Vec<FileEvent> {
        let inner = self.inner.lock();
        inner
            .events
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Flip the processed flag and timestamp. Idempotent: already-processed
    /// and unknown ids are no-ops.
    pub fn mark_processed(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        match inner.by_id.get(&id) {
            Some(&index) => {
                let event = &mut inner.events[index];
                if !event.processed {
                    event.processed = true;
                    event.processed_at = Some(chrono::Utc::now());
                }
            }
            None => tracing::debug!(event_id = %id, "mark_processed for unknown event"),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    pub fn unprocessed_count(&self) -> usize {
        self.inner.lock().events.iter().filter(|e| !e.processed).count()
    }
}
