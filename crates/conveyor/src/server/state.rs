//! Application state for the pipeline server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{ConveyorConfig, ExportBackend, StorageBackend};
use crate::error::Result;
use crate::processors::{DecompressProcessor, ExportProcessor, ParseProcessor};
use crate::providers::{
    CsvTableStore, FsObjectStore, MemoryObjectStore, MemoryTableStore, ObjectStore, TableStore,
};
use crate::scheduling::{JobQueue, ProcessorRegistry, WorkerPool};
use crate::watcher::{ChangeDetector, EventStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: ConveyorConfig,
    /// Object storage backend
    object_store: Arc<dyn ObjectStore>,
    /// Tabular export backend
    table_store: Arc<dyn TableStore>,
    /// Priority queue + status index
    job_queue: Arc<JobQueue>,
    /// Worker pool executing registered processors
    worker_pool: Arc<WorkerPool>,
    /// File event log
    event_store: Arc<EventStore>,
    /// Storage poller
    detector: Arc<ChangeDetector>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state: providers, queue, pool, and watcher,
    /// wired and started.
    pub async fn new(config: ConveyorConfig) -> Result<Self> {
        tracing::info!("initializing pipeline state...");

        let object_store: Arc<dyn ObjectStore> = match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("using in-memory object store");
                Arc::new(MemoryObjectStore::new())
            }
            StorageBackend::Fs => {
                tracing::info!(root = %config.storage.root.display(), "using filesystem object store");
                Arc::new(FsObjectStore::new(&config.storage.root)?)
            }
        };

        let table_store: Arc<dyn TableStore> = match config.export.backend {
            ExportBackend::Memory => {
                tracing::info!("using in-memory table store");
                Arc::new(MemoryTableStore::new())
            }
            ExportBackend::Csv => {
                tracing::info!(dir = %config.export.dir.display(), "using CSV table store");
                Arc::new(CsvTableStore::new(&config.export.dir)?)
            }
        };

        let job_queue = Arc::new(JobQueue::new(config.queue.capacity));
        tracing::info!(capacity = config.queue.capacity, "job queue initialized");

        let mut registry = ProcessorRegistry::new();
        registry.register(
            "decompress",
            Arc::new(DecompressProcessor::new(object_store.clone())),
        );
        registry.register("parse", Arc::new(ParseProcessor::new(object_store.clone())));
        registry.register(
            "export",
            Arc::new(ExportProcessor::new(
                object_store.clone(),
                table_store.clone(),
            )),
        );
        let registry = Arc::new(registry);
        tracing::info!(job_types = ?registry.job_types(), "processors registered");

        let default_chains = Arc::new(config.chains.clone());
        let worker_count = config.workers.effective_count();
        let worker_pool = Arc::new(WorkerPool::new(
            job_queue.clone(),
            registry,
            default_chains.clone(),
            worker_count,
        ));
        worker_pool.start();

        let event_store = Arc::new(EventStore::new());
        let detector = Arc::new(ChangeDetector::new(
            object_store.clone(),
            event_store.clone(),
            job_queue.clone(),
            default_chains,
            config.storage.bucket.clone(),
            config.watcher.clone(),
        ));
        if config.watcher.enabled {
            detector.clone().start();
        } else {
            tracing::info!("change detector disabled by config");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                object_store,
                table_store,
                job_queue,
                worker_pool,
                event_store,
                detector,
                ready: RwLock::new(true),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ConveyorConfig {
        &self.inner.config
    }

    /// Get object store
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.object_store
    }

    /// Get table store
    pub fn table_store(&self) -> &Arc<dyn TableStore> {
        &self.inner.table_store
    }

    /// Get job queue
    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.inner.job_queue
    }

    /// Get worker pool
    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.inner.worker_pool
    }

    /// Get event store
    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.inner.event_store
    }

    /// Get change detector
    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.inner.detector
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }

    /// Stop the watcher and the pool, waiting for in-flight work.
    pub async fn shutdown(&self) {
        self.set_ready(false);
        self.inner.detector.stop().await;
        self.inner.worker_pool.stop().await;
        tracing::info!("pipeline state shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatcherConfig;
    use crate::types::{Job, JobStatus};
    use std::time::Duration;

    fn test_config() -> ConveyorConfig {
        ConveyorConfig {
            storage: crate::config::StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            export: crate::config::ExportConfig {
                backend: ExportBackend::Memory,
                ..Default::default()
            },
            watcher: WatcherConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_through_state() {
        let state = AppState::new(test_config()).await.unwrap();
        state
            .object_store()
            .put("inbox", "drop/items.csv", b"name,count\nwidget,3\n".to_vec())
            .await
            .unwrap();

        // decompress passes the csv through, parse tabulates it, export
        // lands the rows; the chain assembles itself from config
        let job = Job::new("decompress", "inbox", "drop/items.csv").with_triggers(
            state.config().chains["decompress"].clone(),
        );
        let id = state.job_queue().enqueue(job).unwrap();

        for _ in 0..300 {
            if state.job_queue().stats().completed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = state.job_queue().stats();
        assert_eq!(stats.completed, 3, "decompress, parse, export all completed");

        let jobs = state.job_queue().list();
        let export = jobs.iter().find(|j| j.job_type == "export").unwrap();
        assert_eq!(export.chain_id, Some(id));
        assert_eq!(export.status, JobStatus::Completed);
        assert_eq!(state.table_store().tables().await.unwrap(), vec!["items"]);

        state.shutdown().await;
    }
}
