//! Local upload store and the data source backed by it.
//!
//! Callers upload peer-metric CSVs ahead of analysis requests; the store
//! keeps parsed rows in memory under a generated document id. Like the job
//! registry, uploads are process-scoped and not persisted.

use super::{DataSource, RequestKind, SourceError};
use crate::jobs::JobInput;
use async_trait::async_trait;
use bankiq_common::{Error, Result, SourceKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// One parsed CSV row. Expected columns: Bank, Metric, Quarter, Value.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRow {
    pub bank: String,
    pub metric: String,
    pub quarter: String,
    pub value: f64,
}

/// A parsed uploaded document.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedDoc {
    pub id: Uuid,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub rows: Vec<PeerRow>,
}

/// In-memory store of uploaded peer data.
pub struct UploadStore {
    docs: RwLock<HashMap<Uuid, Arc<UploadedDoc>>>,
}

impl UploadStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Parse and store a CSV document. Returns the stored document.
    ///
    /// Rows that fail to parse are skipped; a document with zero usable rows
    /// is rejected outright so a later analysis cannot silently run on
    /// nothing.
    pub async fn put_csv(&self, filename: &str, content: &str) -> Result<Arc<UploadedDoc>> {
        let rows = parse_peer_csv(content)?;
        if rows.is_empty() {
            return Err(Error::InvalidInput(
                "CSV contained no parsable data rows".to_string(),
            ));
        }

        let doc = Arc::new(UploadedDoc {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            rows,
        });

        info!(
            upload_id = %doc.id,
            filename = %doc.filename,
            rows = doc.rows.len(),
            "Stored uploaded peer data"
        );
        self.docs.write().await.insert(doc.id, doc.clone());
        Ok(doc)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<UploadedDoc>> {
        self.docs.read().await.get(&id).cloned()
    }

    /// Summaries for the admin surface.
    pub async fn list(&self) -> Vec<Value> {
        let docs = self.docs.read().await;
        let mut out: Vec<Value> = docs
            .values()
            .map(|doc| {
                json!({
                    "upload_id": doc.id,
                    "filename": doc.filename,
                    "uploaded_at": doc.uploaded_at,
                    "rows": doc.rows.len(),
                })
            })
            .collect();
        out.sort_by(|a, b| a["uploaded_at"].as_str().cmp(&b["uploaded_at"].as_str()));
        out
    }
}

impl Default for UploadStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_peer_csv(content: &str) -> Result<Vec<PeerRow>> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| Error::InvalidInput("empty CSV".to_string()))?;

    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let index_of = |name: &str| columns.iter().position(|c| c == name);
    let (bank_i, metric_i, quarter_i, value_i) = match (
        index_of("bank"),
        index_of("metric"),
        index_of("quarter"),
        index_of("value"),
    ) {
        (Some(b), Some(m), Some(q), Some(v)) => (b, m, q, v),
        _ => {
            return Err(Error::InvalidInput(
                "CSV header must contain Bank, Metric, Quarter, Value".to_string(),
            ))
        }
    };

    let mut rows = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |i: usize| fields.get(i).copied().unwrap_or_default();
        let Ok(value) = cell(value_i).parse::<f64>() else {
            continue;
        };
        if cell(bank_i).is_empty() || cell(metric_i).is_empty() {
            continue;
        }
        rows.push(PeerRow {
            bank: cell(bank_i).to_string(),
            metric: cell(metric_i).to_string(),
            quarter: cell(quarter_i).to_string(),
            value,
        });
    }
    Ok(rows)
}

/// Data source view over the upload store.
pub struct LocalUploadSource {
    store: Arc<UploadStore>,
}

impl LocalUploadSource {
    pub fn new(store: Arc<UploadStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataSource for LocalUploadSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LocalUpload
    }

    async fn search(
        &self,
        _kind: RequestKind,
        input: &JobInput,
    ) -> std::result::Result<Value, SourceError> {
        let upload_id = input
            .upload_id
            .ok_or_else(|| SourceError::NotFound("request references no upload".into()))?;
        let doc = self
            .store
            .get(upload_id)
            .await
            .ok_or_else(|| SourceError::NotFound(format!("upload not found: {upload_id}")))?;

        let wanted_metric = input.metric.as_deref().map(str::to_ascii_lowercase);
        let mut wanted_banks: Vec<String> = input
            .bank
            .iter()
            .map(|b| b.to_ascii_lowercase())
            .collect();
        wanted_banks.extend(input.peer_banks.iter().map(|b| b.to_ascii_lowercase()));

        let rows: Vec<&PeerRow> = doc
            .rows
            .iter()
            .filter(|row| {
                wanted_metric
                    .as_deref()
                    .map_or(true, |m| row.metric.to_ascii_lowercase() == m)
            })
            .filter(|row| {
                wanted_banks.is_empty()
                    || wanted_banks
                        .iter()
                        .any(|b| row.bank.to_ascii_lowercase().contains(b.as_str()))
            })
            .collect();

        if rows.is_empty() {
            return Err(SourceError::NotFound(format!(
                "upload {} has no rows matching the request",
                doc.id
            )));
        }

        Ok(json!({
            "upload_id": doc.id,
            "filename": doc.filename,
            "rows": rows,
        }))
    }
}
