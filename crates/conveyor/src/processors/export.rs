//! Tabular export stage: parsed artifacts into the table store

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::providers::{ObjectStore, TableStore};
use crate::scheduling::JobProcessor;
use crate::types::{Job, JobResult};

use super::parse::TableArtifact;
use super::upstream_keys;

/// Reads table artifacts produced by the parse stage and lands their rows
/// in the tabular store.
pub struct ExportProcessor {
    store: Arc<dyn ObjectStore>,
    tables: Arc<dyn TableStore>,
}

impl ExportProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, tables: Arc<dyn TableStore>) -> Self {
        Self { store, tables }
    }
}

/// Table name from a source key: file stem, lowercased, non-alphanumerics
/// collapsed to underscores.
pub fn table_name(source: &str) -> String {
    let stem = source
        .rsplit('/')
        .next()
        .unwrap_or(source)
        .split('.')
        .next()
        .unwrap_or(source);
    let mut name = String::with_capacity(stem.len());
    let mut last_was_sep = false;
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !name.is_empty() {
            name.push('_');
            last_was_sep = true;
        }
    }
    let name = name.trim_end_matches('_').to_string();
    if name.is_empty() {
        "table".to_string()
    } else {
        name
    }
}

#[async_trait]
impl JobProcessor for ExportProcessor {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> Result<JobResult> {
        let artifact_keys = upstream_keys(job, "tables");
        let mut exported = Vec::new();
        let mut total_rows = 0usize;

        for key in artifact_keys {
            if ctx.is_cancelled() {
                return Ok(JobResult::error("cancelled during export"));
            }
            let raw = self.store.get(&job.bucket, &key).await?;
            let artifact: TableArtifact = serde_json::from_slice(&raw)
                .map_err(|e| Error::processor(format!("bad table artifact '{}': {}", key, e)))?;

            let name = table_name(&artifact.source);
            self.tables.create_table(&name, &artifact.columns).await?;
            let appended = self.tables.append_rows(&name, &artifact.rows).await?;
            total_rows += appended;
            tracing::info!(table = %name, rows = appended, "rows exported");
            exported.push(name);
        }

        let count = exported.len();
        Ok(JobResult::ok(format!("exported {} table(s), {} rows", count, total_rows))
            .with_data("tables", json!(exported))
            .with_data("rows", json!(total_rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Column, ColumnType, MemoryObjectStore, MemoryTableStore};
    use crate::scheduling::chain::META_PARENT_RESULT;

    fn artifact() -> TableArtifact {
        TableArtifact {
            source: "extracted/batch/Items List.csv".to_string(),
            columns: vec![
                Column::new("name", ColumnType::Text),
                Column::new("count", ColumnType::Integer),
            ],
            rows: vec![
                vec![json!("widget"), json!(3)],
                vec![json!("gadget"), json!(5)],
            ],
        }
    }

    #[test]
    fn test_table_name_sanitization() {
        assert_eq!(table_name("extracted/batch/Items List.csv"), "items_list");
        assert_eq!(table_name("drop/2024-q3.report.xlsx"), "2024_q3");
        assert_eq!(table_name("plain"), "plain");
        assert_eq!(table_name("///..."), "table");
    }

    #[tokio::test]
    async fn test_export_creates_table_and_appends() {
        let store = Arc::new(MemoryObjectStore::new());
        let tables = Arc::new(MemoryTableStore::new());
        store
            .put(
                "inbox",
                "parsed/a.table.json",
                serde_json::to_vec(&artifact()).unwrap(),
            )
            .await
            .unwrap();

        let processor = ExportProcessor::new(store, tables.clone());
        let job = Job::new("export", "inbox", "parsed/a.table.json");
        let result = processor
            .process(&CancellationToken::new(), &job)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data["tables"], json!(["items_list"]));
        assert_eq!(result.data["rows"], 2);
        assert_eq!(tables.rows("items_list").unwrap().len(), 2);
        assert_eq!(tables.columns("items_list").unwrap()[1].name, "count");
    }

    #[tokio::test]
    async fn test_export_consumes_upstream_artifact_list() {
        let store = Arc::new(MemoryObjectStore::new());
        let tables = Arc::new(MemoryTableStore::new());
        let mut second = artifact();
        second.source = "extracted/batch/other.csv".to_string();
        store
            .put("inbox", "parsed/a.json", serde_json::to_vec(&artifact()).unwrap())
            .await
            .unwrap();
        store
            .put("inbox", "parsed/b.json", serde_json::to_vec(&second).unwrap())
            .await
            .unwrap();

        let processor = ExportProcessor::new(store, tables.clone());
        let job = Job::new("export", "inbox", "drop/batch.zip").with_metadata(
            META_PARENT_RESULT,
            r#"{"tables": ["parsed/a.json", "parsed/b.json"]}"#,
        );
        let result = processor
            .process(&CancellationToken::new(), &job)
            .await
            .unwrap();

        assert_eq!(result.data["rows"], 4);
        assert_eq!(tables.tables().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_export_appends() {
        let store = Arc::new(MemoryObjectStore::new());
        let tables = Arc::new(MemoryTableStore::new());
        store
            .put("inbox", "parsed/a.json", serde_json::to_vec(&artifact()).unwrap())
            .await
            .unwrap();

        let processor = ExportProcessor::new(store, tables.clone());
        let job = Job::new("export", "inbox", "parsed/a.json");
        processor.process(&CancellationToken::new(), &job).await.unwrap();
        processor.process(&CancellationToken::new(), &job).await.unwrap();

        assert_eq!(tables.rows("items_list").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_artifact_fails() {
        let store = Arc::new(MemoryObjectStore::new());
        let tables = Arc::new(MemoryTableStore::new());
        store.put("inbox", "parsed/a.json", b"junk".to_vec()).await.unwrap();

        let processor = ExportProcessor::new(store, tables);
        let job = Job::new("export", "inbox", "parsed/a.json");
        let err = processor
            .process(&CancellationToken::new(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Processor(_)));
    }
}
