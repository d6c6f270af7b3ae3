//! Archive extraction stage

use async_trait::async_trait;
use serde_json::json;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::providers::ObjectStore;
use crate::scheduling::JobProcessor;
use crate::types::{Job, JobResult};

/// Prefix under which extracted archive entries are uploaded.
const EXTRACTED_PREFIX: &str = "extracted";

/// Unpacks zip archives back into the object store. Non-archives pass
/// through untouched so the rest of the chain sees a uniform file list.
pub struct DecompressProcessor {
    store: Arc<dyn ObjectStore>,
}

impl DecompressProcessor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

fn is_zip(key: &str) -> bool {
    key.rsplit('.').next().is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

#[async_trait]
impl JobProcessor for DecompressProcessor {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> Result<JobResult> {
        let data = self.store.get(&job.bucket, &job.object_name).await?;

        if !is_zip(&job.object_name) {
            return Ok(JobResult::ok("not an archive, passed through")
                .with_data("files", json!([job.object_name]))
                .with_data("extracted", json!(0)));
        }

        let stem = job
            .object_name
            .strip_suffix(".zip")
            .unwrap_or(&job.object_name);
        let cursor = Cursor::new(data);
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|e| Error::processor(format!("invalid zip archive: {}", e)))?;

        let mut files = Vec::new();
        for index in 0..archive.len() {
            if ctx.is_cancelled() {
                return Ok(JobResult::error("cancelled during extraction"));
            }
            let (name, contents) = {
                let mut entry = archive
                    .by_index(index)
                    .map_err(|e| Error::processor(format!("bad zip entry: {}", e)))?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().to_string();
                // entries name arbitrary paths; refuse escapes
                if name.split('/').any(|part| part == "..") {
                    tracing::warn!(entry = %name, "skipping unsafe archive entry");
                    continue;
                }
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut contents)?;
                (name, contents)
            };

            let key = format!("{}/{}/{}", EXTRACTED_PREFIX, stem, name);
            self.store.put(&job.bucket, &key, contents).await?;
            files.push(key);
        }

        tracing::info!(
            archive = %job.object_name,
            entries = files.len(),
            "archive extracted"
        );
        let count = files.len();
        Ok(JobResult::ok(format!("extracted {} entries", count))
            .with_data("files", json!(files))
            .with_data("extracted", json!(count)))
    }
}
