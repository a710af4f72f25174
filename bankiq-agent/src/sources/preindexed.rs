//! Pre-indexed knowledge-base source.
//!
//! Retrieval-only client for the semantic store of indexed SEC filings.
//! Coverage is deliberately narrow: ten major banks over a one-year window.
//! Requests outside that envelope are routed elsewhere; the client itself
//! answers "not found" rather than guessing.

use super::{DataSource, RequestKind, SourceError};
use crate::jobs::JobInput;
use async_trait::async_trait;
use bankiq_common::SourceKind;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const HTTP_TIMEOUT_SECS: u64 = 30;
const MAX_RESULTS: usize = 5;

/// Banks present in the pre-indexed store.
const COVERED_BANKS: &[&str] = &[
    "JPMORGAN",
    "BANK OF AMERICA",
    "WELLS FARGO",
    "CITIGROUP",
    "U.S. BANCORP",
    "PNC",
    "GOLDMAN SACHS",
    "TRUIST",
    "CAPITAL ONE",
    "MORGAN STANLEY",
];

/// Indexed window: filings from October 2024 through September 2025.
pub fn index_window() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 10, 1).expect("static date"),
        NaiveDate::from_ymd_opt(2025, 10, 1).expect("static date"),
    )
}

/// Whether a bank is inside the coverage set.
pub fn covers_bank(bank: &str) -> bool {
    let upper = bank.trim().to_uppercase();
    if upper.is_empty() {
        return false;
    }
    COVERED_BANKS
        .iter()
        .any(|covered| upper.contains(covered) || covered.contains(upper.as_str()))
}

/// Whether a requested timeframe sits inside the indexed window. An absent
/// timeframe means "recent", which the store covers by construction.
pub fn covers_timeframe(from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    let (start, end) = index_window();
    let inside = |date: NaiveDate| date >= start && date < end;
    from.map_or(true, inside) && to.map_or(true, inside)
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<RetrievedDoc>,
}

#[derive(Debug, Deserialize)]
struct RetrievedDoc {
    content: String,
    #[serde(default)]
    source_uri: Option<String>,
}

/// Retrieval client for the knowledge-base endpoint.
pub struct PreindexedSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl PreindexedSource {
    pub fn new(base_url: String) -> bankiq_common::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| bankiq_common::Error::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    async fn retrieve(&self, bank: &str, query: &str) -> Result<Value, SourceError> {
        let url = format!("{}/retrieve", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "query": format!("For {bank}: {query}"),
                "max_results": MAX_RESULTS,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Upstream(format!("knowledge base: {status}")));
        }
        let parsed: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Upstream(format!("decode: {e}")))?;

        if parsed.results.is_empty() {
            return Err(SourceError::NotFound(format!(
                "knowledge base has nothing for {bank}"
            )));
        }

        let documents: Vec<&str> = parsed.results.iter().map(|d| d.content.as_str()).collect();
        let sources: Vec<&str> = parsed
            .results
            .iter()
            .filter_map(|d| d.source_uri.as_deref())
            .collect();
        Ok(json!({
            "bank": bank,
            "retrieved_documents": documents,
            "sources": sources,
        }))
    }
}

#[async_trait]
impl DataSource for PreindexedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Preindexed
    }

    async fn search(&self, kind: RequestKind, input: &JobInput) -> Result<Value, SourceError> {
        let bank = match input.bank.as_deref().map(str::trim) {
            Some(bank) if !bank.is_empty() => bank,
            _ => return Err(SourceError::NotFound("request names no bank".into())),
        };
        if !covers_bank(bank) {
            return Err(SourceError::NotFound(format!("{bank} is outside coverage")));
        }

        let query = match kind {
            RequestKind::Filings => format!(
                "{} filings and disclosures",
                input.form_type.as_deref().unwrap_or("annual")
            ),
            RequestKind::Metrics => format!(
                "financial metrics: {}",
                input.metric.as_deref().unwrap_or("all key metrics")
            ),
            RequestKind::BankSearch | RequestKind::General => {
                "all available financial data".to_string()
            }
        };

        self.retrieve(bank, &query).await
    }
}
