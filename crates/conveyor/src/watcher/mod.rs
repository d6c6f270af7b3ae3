//! Change detection: polling the object store and diffing snapshots
//!
//! The poller turns storage mutations into `FileEvent`s. Delivery is
//! at-least-once; downstream jobs are expected to be idempotent.

pub mod event_store;

pub use event_store::EventStore;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::providers::{list_all, ObjectMeta, ObjectStore};
use crate::scheduling::JobQueue;
use crate::types::{FileEvent, FileEventType, Job, Trigger};

/// Poller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Idle,
    Polling,
    Stopped,
}

/// Callback invoked synchronously for each emitted event. Slow handlers
/// delay the next tick; hand off internally if that matters.
pub type EventHandler = Arc<dyn Fn(&FileEvent) + Send + Sync>;

/// Periodic poller that snapshots the watched bucket, diffs against the
/// previous snapshot, records events, and optionally auto-enqueues jobs for
/// newly created objects.
pub struct ChangeDetector {
    store: Arc<dyn ObjectStore>,
    events: Arc<EventStore>,
    queue: Arc<JobQueue>,
    default_chains: Arc<HashMap<String, Vec<Trigger>>>,
    bucket: String,
    config: WatcherConfig,
    handler: Mutex<Option<EventHandler>>,
    /// Replaced only after a successful, complete listing.
    previous: Mutex<HashMap<String, ObjectMeta>>,
    state: Mutex<WatcherState>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeDetector {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<EventStore>,
        queue: Arc<JobQueue>,
        default_chains: Arc<HashMap<String, Vec<Trigger>>>,
        bucket: impl Into<String>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            events,
            queue,
            default_chains,
            bucket: bucket.into(),
            config,
            handler: Mutex::new(None),
            previous: Mutex::new(HashMap::new()),
            state: Mutex::new(WatcherState::Idle),
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Register the event handler. Only one handler is supported; a second
    /// registration replaces the first.
    pub fn set_handler(&self, handler: EventHandler) {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            tracing::warn!("replacing registered event handler");
        }
        *slot = Some(handler);
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Begin the timer loop on a dedicated task. Call on a clone; the
    /// handle lives inside the detector for `stop` to await.
    pub fn start(self: Arc<Self>) {
        let detector = Arc::clone(&self);
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        tracing::info!(
            bucket = %self.bucket,
            prefix = %self.config.prefix,
            interval_secs = interval.as_secs(),
            "change detector started"
        );
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = detector.token.cancelled() => break,
                    _ = ticker.tick() => {
                        *detector.state.lock() = WatcherState::Polling;
                        match detector.poll_once().await {
                            Ok(emitted) if emitted > 0 => {
                                tracing::info!(events = emitted, "poll cycle emitted events");
                            }
                            Ok(_) => {}
                            // snapshot retained; next tick retries
                            Err(e) => tracing::warn!(error = %e, "poll cycle failed"),
                        }
                        if detector.token.is_cancelled() {
                            break;
                        }
                        *detector.state.lock() = WatcherState::Idle;
                    }
                }
            }
            *detector.state.lock() = WatcherState::Stopped;
            tracing::info!("change detector stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    /// Signal the loop to stop and wait for any in-flight poll to finish.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                let _ = handle.await;
            }
            // never started; mark stopped directly
            None => *self.state.lock() = WatcherState::Stopped,
        }
    }

    /// Run one poll cycle: list in full, diff, emit. Returns the number of
    /// events emitted. A listing failure leaves the previous snapshot
    /// untouched.
    pub async fn poll_once(&self) -> Result<usize> {
        let listing = list_all(self.store.as_ref(), &self.bucket, &self.config.prefix)
            .await
            .map_err(|e| Error::poll(e.to_string()))?;
        let current: HashMap<String, ObjectMeta> = listing
            .into_iter()
            .map(|meta| (meta.key.clone(), meta))
            .collect();

        let events = {
            let previous = self.previous.lock();
            diff_snapshots(&self.bucket, &previous, &current)
        };

        let mut emitted = 0;
        for event in events {
            if self.emit(event) {
                emitted += 1;
            }
        }

        *self.previous.lock() = current;
        Ok(emitted)
    }

    /// Record, dispatch, and possibly auto-enqueue one event. Returns false
    /// when the event store had already seen this identity.
    fn emit(&self, event: FileEvent) -> bool {
        if !self.events.append(event.clone()) {
            return false;
        }
        tracing::debug!(
            key = %event.key,
            event_type = ?event.event_type,
            "file event recorded"
        );

        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(&event);
        }

        if event.event_type == FileEventType::Created && self.config.auto_enqueue {
            let job = Job::new(&self.config.job_type, &event.bucket, &event.key)
                .with_priority(self.config.priority)
                .with_triggers(
                    self.default_chains
                        .get(&self.config.job_type)
                        .cloned()
                        .unwrap_or_default(),
                )
                .with_metadata("event_id", event.id.to_string())
                .with_metadata("etag", event.etag.clone());
            match self.queue.enqueue(job) {
                Ok(job_id) => {
                    tracing::info!(key = %event.key, job_id = %job_id, "auto-enqueued job")
                }
                // backpressure: drop with a log rather than block the poller
                Err(e) => tracing::warn!(key = %event.key, error = %e, "dropping auto job"),
            }
        }
        true
    }
}

/// Diff two snapshots into events, sorted by key for determinism.
fn diff_snapshots(
    bucket: &str,
    previous: &HashMap<String, ObjectMeta>,
    current: &HashMap<String, ObjectMeta>,
) -> Vec<FileEvent> {
    let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut events = Vec::new();
    for key in keys {
        match (previous.get(key), current.get(key)) {
            (None, Some(now)) => events.push(FileEvent::new(
                FileEventType::Created,
                bucket,
                key.clone(),
                now.size,
                now.etag.clone(),
            )),
            (Some(was), None) => events.push(FileEvent::new(
                FileEventType::Removed,
                bucket,
                key.clone(),
                was.size,
                was.etag.clone(),
            )),
            (Some(was), Some(now)) => {
                if was.etag != now.etag || was.size != now.size {
                    events.push(FileEvent::new(
                        FileEventType::Modified,
                        bucket,
                        key.clone(),
                        now.size,
                        now.etag.clone(),
                    ));
                }
            }
            (None, None) => unreachable!("key came from one of the snapshots"),
        }
    }
    events
}
