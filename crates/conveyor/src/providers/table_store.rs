//! Tabular store capability
//!
//! The export stage lands parsed rows here. Backends: in-memory tables for
//! tests and a CSV-file-per-table store for local operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Inferred column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Opaque tabular storage: create tables, append rows.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create a table with the given schema. Creating an existing table is
    /// a no-op (the first schema wins).
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<()>;

    /// Append rows to an existing table; returns the number appended.
    async fn append_rows(&self, name: &str, rows: &[Vec<serde_json::Value>]) -> Result<usize>;

    /// Names of all known tables.
    async fn tables(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<Column>,
    rows: Vec<Vec<serde_json::Value>>,
}

/// In-memory table store.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one table's rows, for assertions in tests.
    pub fn rows(&self, name: &str) -> Option<Vec<Vec<serde_json::Value>>> {
        self.tables.lock().get(name).map(|t| t.rows.clone())
    }

    pub fn columns(&self, name: &str) -> Option<Vec<Column>> {
        self.tables.lock().get(name).map(|t| t.columns.clone())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.entry(name.to_string()).or_insert_with(|| MemoryTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn append_rows(&self, name: &str, rows: &[Vec<serde_json::Value>]) -> Result<usize> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::table(format!("unknown table '{}'", name)))?;
        table.rows.extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// CSV-file-per-table store. The header row is written on create; appends
/// go to the end of the file.
pub struct CsvTableStore {
    dir: PathBuf,
    // serializes header-write vs append on the same file
    write_lock: Mutex<()>,
}

impl CsvTableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", name))
    }
}

fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TableStore for CsvTableStore {
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.table_path(name);
        if path.exists() {
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| Error::table(format!("create '{}': {}", name, e)))?;
        writer
            .write_record(columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| Error::table(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    async fn append_rows(&self, name: &str, rows: &[Vec<serde_json::Value>]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let path = self.table_path(name);
        if !path.exists() {
            return Err(Error::table(format!("unknown table '{}'", name)));
        }
        let file = fs::OpenOptions::new().append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        for row in rows {
            writer
                .write_record(row.iter().map(cell_to_string))
                .map_err(|e| Error::table(e.to_string()))?;
        }
        writer.flush()?;
        Ok(rows.len())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<Column> {
        vec![
            Column::new("name", ColumnType::Text),
            Column::new("count", ColumnType::Integer),
        ]
    }

    #[tokio::test]
    async fn test_memory_create_append_list() {
        let store = MemoryTableStore::new();
        store.create_table("orders", &schema()).await.unwrap();
        let appended = store
            .append_rows("orders", &[vec![json!("widget"), json!(3)]])
            .await
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(store.rows("orders").unwrap().len(), 1);
        assert_eq!(store.tables().await.unwrap(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_memory_append_unknown_table_errors() {
        let store = MemoryTableStore::new();
        let err = store.append_rows("nope", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Table(_)));
    }

    #[tokio::test]
    async fn test_memory_create_is_idempotent() {
        let store = MemoryTableStore::new();
        store.create_table("orders", &schema()).await.unwrap();
        store
            .append_rows("orders", &[vec![json!("a"), json!(1)]])
            .await
            .unwrap();
        // second create keeps existing rows and schema
        store
            .create_table("orders", &[Column::new("other", ColumnType::Text)])
            .await
            .unwrap();
        assert_eq!(store.rows("orders").unwrap().len(), 1);
        assert_eq!(store.columns("orders").unwrap()[0].name, "name");
    }

    #[tokio::test]
    async fn test_csv_store_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path()).unwrap();

        store.create_table("orders", &schema()).await.unwrap();
        store.create_table("orders", &schema()).await.unwrap();
        store
            .append_rows(
                "orders",
                &[
                    vec![json!("widget"), json!(3)],
                    vec![json!("gadget"), json!(5)],
                ],
            )
            .await
            .unwrap();

        let contents = fs::read_to_string(dir.path().join("orders.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["name,count", "widget,3", "gadget,5"]);
        assert_eq!(store.tables().await.unwrap(), vec!["orders"]);
    }
}
