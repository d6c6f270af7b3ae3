//! Pipeline-stage processors
//!
//! Each stage is a [`JobProcessor`](crate::scheduling::JobProcessor)
//! registered under its job type. Stages pass work forward through the
//! object store; the keys travel in the chained job's `parent_result`
//! metadata.

pub mod decompress;
pub mod export;
pub mod parse;

pub use decompress::DecompressProcessor;
pub use export::ExportProcessor;
pub use parse::{ParseProcessor, TableArtifact};

use crate::scheduling::chain::parent_result_data;
use crate::types::Job;

/// Resolve the input keys for a stage: the named field of the upstream
/// result if present, else the job's own target object.
pub(crate) fn upstream_keys(job: &Job, field: &str) -> Vec<String> {
    parent_result_data(job)
        .and_then(|data| data.get(field).cloned())
        .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
        .filter(|keys| !keys.is_empty())
        .unwrap_or_else(|| vec![job.object_name.clone()])
}
