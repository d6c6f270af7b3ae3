//! Tabular parsing stage: CSV/XLSX into typed rows with schema inference

use async_trait::async_trait;
use calamine::Reader;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::providers::{Column, ColumnType, ObjectStore};
use crate::scheduling::JobProcessor;
use crate::types::{Job, JobResult};

use super::upstream_keys;

/// Prefix under which parsed table artifacts are uploaded.
const PARSED_PREFIX: &str = "parsed";

/// Normalized table passed from the parse stage to the export stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableArtifact {
    /// Object key the table was parsed from.
    pub source: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Parses spreadsheet-like objects into typed rows and writes one JSON
/// artifact per input for the export stage.
pub struct ParseProcessor {
    store: Arc<dyn ObjectStore>,
}

impl ParseProcessor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobProcessor for ParseProcessor {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> Result<JobResult> {
        let keys = upstream_keys(job, "files");
        let mut artifacts = Vec::new();
        let mut total_rows = 0usize;

        for key in keys {
            if ctx.is_cancelled() {
                return Ok(JobResult::error("cancelled during parsing"));
            }
            let data = self.store.get(&job.bucket, &key).await?;
            let table = parse_table(&key, &data)?;
            total_rows += table.rows.len();

            let artifact_key = format!("{}/{}.table.json", PARSED_PREFIX, key);
            self.store
                .put(&job.bucket, &artifact_key, serde_json::to_vec(&table)?)
                .await?;
            tracing::info!(source = %key, rows = table.rows.len(), "parsed table");
            artifacts.push(artifact_key);
        }

        let count = artifacts.len();
        Ok(JobResult::ok(format!("parsed {} file(s), {} rows", count, total_rows))
            .with_data("tables", json!(artifacts))
            .with_data("rows", json!(total_rows)))
    }
}

/// Parse one object into a normalized table, dispatching on extension.
pub fn parse_table(key: &str, data: &[u8]) -> Result<TableArtifact> {
    let extension = key.rsplit('.').next().unwrap_or("").to_lowercase();
    let (headers, raw_rows) = match extension.as_str() {
        "csv" => read_csv(data)?,
        "xlsx" | "xls" => read_spreadsheet(key, data)?,
        other => {
            return Err(Error::processor(format!(
                "unsupported file type for parsing: '{}' ({})",
                other, key
            )))
        }
    };

    let columns = infer_columns(&headers, &raw_rows);
    let rows = raw_rows
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, column)| coerce(row.get(i).map(String::as_str).unwrap_or(""), column.column_type))
                .collect()
        })
        .collect();

    Ok(TableArtifact {
        source: key.to_string(),
        columns,
        rows,
    })
}

fn read_csv(data: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::Reader::from_reader(data);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::processor(format!("csv header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() {
        return Err(Error::processor("csv file has no header row"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::processor(format!("csv row: {}", e)))?;
        rows.push(record.iter().map(|v| v.to_string()).collect());
    }
    Ok((headers, rows))
}

fn read_spreadsheet(key: &str, data: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let cursor = Cursor::new(data.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::processor(format!("open spreadsheet '{}': {}", key, e)))?;

    // first non-empty sheet carries the table
    for sheet_name in workbook.sheet_names().to_vec() {
        if let Ok(range) = workbook.worksheet_range(&sheet_name) {
            let mut rows = range.rows().map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        calamine::Data::Empty => String::new(),
                        calamine::Data::String(s) => s.clone(),
                        calamine::Data::Float(f) => f.to_string(),
                        calamine::Data::Int(i) => i.to_string(),
                        calamine::Data::Bool(b) => b.to_string(),
                        calamine::Data::DateTime(dt) => dt.to_string(),
                        _ => String::new(),
                    })
                    .collect::<Vec<String>>()
            });
            if let Some(headers) = rows.next() {
                if headers.iter().all(|h| h.is_empty()) {
                    continue;
                }
                return Ok((headers, rows.collect()));
            }
        }
    }
    Err(Error::processor(format!(
        "spreadsheet '{}' has no non-empty sheet",
        key
    )))
}

fn value_type(value: &str) -> ColumnType {
    if value.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if value.parse::<f64>().is_ok() {
        ColumnType::Float
    } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

/// Narrowest type both sides satisfy; integers widen into floats, anything
/// else degrades to text.
fn widen(a: ColumnType, b: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (a, b) {
        (x, y) if x == y => x,
        (Integer, Float) | (Float, Integer) => Float,
        _ => Text,
    }
}

/// Infer one column type per header from the non-empty values beneath it.
fn infer_columns(headers: &[String], rows: &[Vec<String>]) -> Vec<Column> {
    headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let inferred = rows
                .iter()
                .filter_map(|row| row.get(i))
                .filter(|v| !v.is_empty())
                .map(|v| value_type(v))
                .reduce(widen);
            Column::new(name, inferred.unwrap_or(ColumnType::Text))
        })
        .collect()
}

fn coerce(value: &str, column_type: ColumnType) -> serde_json::Value {
    if value.is_empty() {
        return serde_json::Value::Null;
    }
    match column_type {
        ColumnType::Integer => value
            .parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(value)),
        ColumnType::Float => value
            .parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(value)),
        ColumnType::Boolean => json!(value.eq_ignore_ascii_case("true")),
        ColumnType::Text => json!(value),
    }
}
