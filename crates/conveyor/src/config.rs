//! Configuration for the pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{JobPriority, Trigger};

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConveyorConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker pool configuration
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Change detection configuration
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Tabular export configuration
    #[serde(default)]
    pub export: ExportConfig,
    /// Default trigger chains per job type, attached to newly minted jobs
    #[serde(default = "default_chains")]
    pub chains: HashMap<String, Vec<Trigger>>,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            watcher: WatcherConfig::default(),
            export: ExportConfig::default(),
            chains: default_chains(),
        }
    }
}

impl ConveyorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Load from the given path if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("no config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Object storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory store (tests, local experiments)
    Memory,
    /// Filesystem-backed store (buckets are directories)
    #[default]
    Fs,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend implementation
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend
    pub root: PathBuf,
    /// Bucket the pipeline ingests from
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conveyor")
            .join("objects");
        Self {
            backend: StorageBackend::default(),
            root,
            bucket: "inbox".to_string(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued (pending) jobs before enqueues are rejected
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers (default: CPU count, max 4)
    pub count: Option<usize>,
}

impl WorkerConfig {
    /// Resolve the worker count, auto-detecting from CPU count when unset.
    pub fn effective_count(&self) -> usize {
        self.count.unwrap_or_else(|| num_cpus::get().min(4)).max(1)
    }
}

/// Change detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Enable the poller
    pub enabled: bool,
    /// Seconds between poll cycles
    pub interval_secs: u64,
    /// Key prefix to watch within the bucket
    pub prefix: String,
    /// Auto-enqueue a job for each newly created object
    pub auto_enqueue: bool,
    /// Job type for auto-enqueued jobs
    pub job_type: String,
    /// Priority for auto-enqueued jobs
    pub priority: JobPriority,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            prefix: String::new(),
            auto_enqueue: true,
            job_type: "decompress".to_string(),
            priority: JobPriority::Medium,
        }
    }
}

/// Tabular export backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportBackend {
    /// In-memory tables (tests)
    Memory,
    /// One CSV file per table
    #[default]
    Csv,
}

/// Tabular export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Backend implementation
    #[serde(default)]
    pub backend: ExportBackend,
    /// Directory for the CSV backend
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conveyor")
            .join("tables");
        Self {
            backend: ExportBackend::default(),
            dir,
        }
    }
}

/// The shipped pipeline: archives unpack, spreadsheets parse, rows export.
fn default_chains() -> HashMap<String, Vec<Trigger>> {
    let mut chains = HashMap::new();
    chains.insert("decompress".to_string(), vec![Trigger::on_success("parse")]);
    chains.insert("parse".to_string(), vec![Trigger::on_success("export")]);
    chains
}
