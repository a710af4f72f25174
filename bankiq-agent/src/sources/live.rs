//! Live upstream clients: FDIC financials/institutions and SEC EDGAR
//! submissions.
//!
//! Both APIs are public and unauthenticated. EDGAR requires a descriptive
//! User-Agent and fair-use pacing, enforced here with a minimum-interval
//! rate limiter.

use super::{DataSource, RequestKind, SourceError};
use crate::jobs::JobInput;
use async_trait::async_trait;
use bankiq_common::SourceKind;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const USER_AGENT: &str = "bankiq-agent/0.1.0 (contact@bankiq.example)";
const HTTP_TIMEOUT_SECS: u64 = 30;
const EDGAR_RATE_LIMIT_MS: u64 = 200;
const FINANCIAL_FIELDS: &str = "ASSET,DEP,NETINC,ROA,ROE,NIMY,EQTOT,LNLSNET,REPYMD,NAME";
const QUARTERS_RETURNED: usize = 20;

/// Curated identity table for major US banks. Lets common lookups skip a
/// network round-trip and anchors the deterministic routing decisions.
pub struct CuratedBank {
    pub name: &'static str,
    pub ticker: &'static str,
    pub cik: &'static str,
    pub cert: Option<&'static str>,
}

pub const CURATED_BANKS: &[CuratedBank] = &[
    CuratedBank { name: "JPMORGAN CHASE & CO", ticker: "JPM", cik: "0000019617", cert: Some("628") },
    CuratedBank { name: "BANK OF AMERICA CORP", ticker: "BAC", cik: "0000070858", cert: Some("3510") },
    CuratedBank { name: "WELLS FARGO & COMPANY", ticker: "WFC", cik: "0000072971", cert: Some("3511") },
    CuratedBank { name: "CITIGROUP INC", ticker: "C", cik: "0000831001", cert: Some("7213") },
    CuratedBank { name: "GOLDMAN SACHS GROUP INC", ticker: "GS", cik: "0000886982", cert: Some("33124") },
    CuratedBank { name: "MORGAN STANLEY", ticker: "MS", cik: "0000895421", cert: Some("65012") },
    CuratedBank { name: "U.S. BANCORP", ticker: "USB", cik: "0000036104", cert: Some("6548") },
    CuratedBank { name: "PNC FINANCIAL SERVICES GROUP INC", ticker: "PNC", cik: "0000713676", cert: Some("6384") },
    CuratedBank { name: "CAPITAL ONE FINANCIAL CORP", ticker: "COF", cik: "0000927628", cert: Some("4297") },
    CuratedBank { name: "TRUIST FINANCIAL CORP", ticker: "TFC", cik: "0001534701", cert: Some("14291") },
    CuratedBank { name: "FIFTH THIRD BANCORP", ticker: "FITB", cik: "0000035527", cert: Some("6672") },
    CuratedBank { name: "REGIONS FINANCIAL CORP", ticker: "RF", cik: "0001281761", cert: Some("12368") },
    CuratedBank { name: "WEBSTER FINANCIAL CORP", ticker: "WBS", cik: "0000801337", cert: None },
    CuratedBank { name: "KEYCORP", ticker: "KEY", cik: "0000091576", cert: None },
    CuratedBank { name: "M&T BANK CORP", ticker: "MTB", cik: "0000036270", cert: None },
    CuratedBank { name: "HUNTINGTON BANCSHARES INC", ticker: "HBAN", cik: "0000049196", cert: None },
];

/// Case-insensitive curated lookup by name containment or exact ticker.
pub fn curated_lookup(query: &str) -> Option<&'static CuratedBank> {
    let upper = query.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    CURATED_BANKS.iter().find(|bank| {
        bank.ticker == upper || bank.name.contains(&upper) || upper.contains(bank.name)
    })
}

/// Minimum-interval rate limiter for EDGAR fair-use pacing.
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the interval.
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting EDGAR: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct FdicEnvelope {
    #[serde(default)]
    data: Vec<FdicRecord>,
}

#[derive(Debug, Deserialize)]
struct FdicRecord {
    data: Value,
}

/// FDIC BankFind API client (institutions + financials).
pub struct FdicClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl FdicClient {
    fn new(http_client: reqwest::Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    /// Resolve a bank name to its FDIC certificate number: curated table
    /// first, then an institutions search picking the largest active match.
    async fn find_cert(&self, bank: &str) -> Result<(String, String), SourceError> {
        if let Some(found) = curated_lookup(bank) {
            if let Some(cert) = found.cert {
                return Ok((cert.to_string(), found.name.to_string()));
            }
        }

        let records = self.institutions(bank).await?;
        let mut active: Vec<&Value> = records
            .iter()
            .filter(|r| r.get("ACTIVE").and_then(Value::as_i64).unwrap_or(1) == 1)
            .collect();
        active.sort_by(|a, b| {
            let asset = |v: &Value| v.get("ASSET").and_then(Value::as_f64).unwrap_or(0.0);
            asset(b).total_cmp(&asset(a))
        });

        match active.first() {
            Some(top) => {
                let cert = top
                    .get("CERT")
                    .map(|c| c.to_string().trim_matches('"').to_string())
                    .ok_or_else(|| SourceError::NotFound(format!("no CERT for {bank}")))?;
                let name = top
                    .get("NAME")
                    .and_then(Value::as_str)
                    .unwrap_or(bank)
                    .to_string();
                Ok((cert, name))
            }
            None => Err(SourceError::NotFound(format!("bank not found: {bank}"))),
        }
    }

    async fn institutions(&self, name: &str) -> Result<Vec<Value>, SourceError> {
        let url = format!("{}/banks/institutions", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("search", format!("NAME:{}", name.trim())),
                ("fields", "CERT,NAME,ASSET,ACTIVE".to_string()),
                ("limit", "50".to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let envelope: FdicEnvelope = decode(response).await?;
        Ok(envelope.data.into_iter().map(|r| r.data).collect())
    }

    /// Most recent quarterly financial records for one certificate.
    async fn financials(&self, cert: &str) -> Result<Vec<Value>, SourceError> {
        let url = format!("{}/banks/financials", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("filters", format!("CERT:{cert}")),
                ("fields", FINANCIAL_FIELDS.to_string()),
                ("limit", QUARTERS_RETURNED.to_string()),
                ("sort_by", "REPYMD".to_string()),
                ("sort_order", "DESC".to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let envelope: FdicEnvelope = decode(response).await?;
        if envelope.data.is_empty() {
            return Err(SourceError::NotFound(format!(
                "no financial records for CERT {cert}"
            )));
        }
        Ok(envelope.data.into_iter().map(|r| r.data).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EdgarSubmissions {
    #[serde(default)]
    filings: EdgarFilings,
}

#[derive(Debug, Default, Deserialize)]
struct EdgarFilings {
    #[serde(default)]
    recent: EdgarRecent,
}

#[derive(Debug, Default, Deserialize)]
struct EdgarRecent {
    #[serde(default)]
    form: Vec<String>,
    #[serde(default, rename = "filingDate")]
    filing_date: Vec<String>,
    #[serde(default, rename = "accessionNumber")]
    accession_number: Vec<String>,
}

/// SEC EDGAR submissions client.
pub struct EdgarClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl EdgarClient {
    fn new(http_client: reqwest::Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
            rate_limiter: RateLimiter::new(EDGAR_RATE_LIMIT_MS),
        }
    }

    /// Recent filings of one form type for a CIK, newest first, optionally
    /// clipped to a date range.
    async fn filings(
        &self,
        cik: &str,
        form_type: &str,
        from: Option<chrono::NaiveDate>,
        to: Option<chrono::NaiveDate>,
    ) -> Result<Vec<Value>, SourceError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/submissions/CIK{}.json", self.base_url, cik);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport)?;
        let submissions: EdgarSubmissions = decode(response).await?;

        let recent = submissions.filings.recent;
        let form_type = form_type.to_ascii_uppercase();
        let mut results = Vec::new();
        for ((form, date), accession) in recent
            .form
            .iter()
            .zip(recent.filing_date.iter())
            .zip(recent.accession_number.iter())
        {
            if !form.eq_ignore_ascii_case(&form_type) {
                continue;
            }
            if let Ok(parsed) = date.parse::<chrono::NaiveDate>() {
                if from.is_some_and(|f| parsed < f) || to.is_some_and(|t| parsed > t) {
                    continue;
                }
            }
            results.push(json!({
                "form_type": form,
                "filing_date": date,
                "accession_number": accession,
                "url": format!(
                    "https://www.sec.gov/cgi-bin/viewer?action=view&cik={}&accession_number={}",
                    cik.trim_start_matches('0'),
                    accession
                ),
            }));
        }
        results.sort_by(|a, b| b["filing_date"].as_str().cmp(&a["filing_date"].as_str()));
        results.truncate(10);
        Ok(results)
    }
}

/// The live source: FDIC for metrics and identity, EDGAR for filings.
pub struct LiveSource {
    fdic: FdicClient,
    edgar: EdgarClient,
}

impl LiveSource {
    pub fn new(fdic_base_url: String, edgar_base_url: String) -> bankiq_common::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| bankiq_common::Error::Internal(format!("http client: {e}")))?;

        Ok(Self {
            fdic: FdicClient::new(http_client.clone(), fdic_base_url),
            edgar: EdgarClient::new(http_client, edgar_base_url),
        })
    }

    async fn metrics(&self, input: &JobInput) -> Result<Value, SourceError> {
        let base = required_bank(input)?;
        let metric = input.metric.clone().unwrap_or_else(|| "ROA".to_string());
        let field = metric_field(&metric);

        let mut series = Vec::new();
        for bank in std::iter::once(base).chain(input.peer_banks.iter().map(String::as_str)) {
            match self.fdic.find_cert(bank).await {
                Ok((cert, official_name)) => {
                    let records = self.fdic.financials(&cert).await?;
                    series.push(json!({
                        "bank": bank,
                        "official_name": official_name,
                        "cert": cert,
                        "field": field,
                        "records": records,
                    }));
                }
                Err(SourceError::NotFound(reason)) => {
                    debug!(bank, reason, "Skipping unresolvable peer");
                }
                Err(other) => return Err(other),
            }
        }

        if series.is_empty() {
            return Err(SourceError::NotFound("no requested bank resolved".into()));
        }
        Ok(json!({ "metric": metric, "field": field, "series": series }))
    }

    async fn filings(&self, input: &JobInput) -> Result<Value, SourceError> {
        let bank = required_bank(input)?;
        let form_type = input.form_type.as_deref().unwrap_or("10-K");

        let cik = curated_lookup(bank)
            .map(|found| found.cik.to_string())
            .ok_or_else(|| {
                SourceError::NotFound(format!("CIK not known for {bank}; search the bank first"))
            })?;

        let filings = self.edgar.filings(&cik, form_type, input.from, input.to).await?;
        if filings.is_empty() {
            return Err(SourceError::NotFound(format!(
                "no {form_type} filings for {bank} in range"
            )));
        }
        Ok(json!({ "bank": bank, "cik": cik, "form_type": form_type, "filings": filings }))
    }

    async fn bank_search(&self, input: &JobInput) -> Result<Value, SourceError> {
        let query = required_bank(input)?;

        if let Some(found) = curated_lookup(query) {
            return Ok(json!({
                "query": query,
                "results": [{
                    "name": found.name,
                    "ticker": found.ticker,
                    "cik": found.cik,
                    "cert": found.cert,
                }],
            }));
        }

        let records = self.fdic.institutions(query).await?;
        if records.is_empty() {
            return Err(SourceError::NotFound(format!("no banks match {query}")));
        }
        Ok(json!({ "query": query, "results": records }))
    }
}

#[async_trait]
impl DataSource for LiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn search(&self, kind: RequestKind, input: &JobInput) -> Result<Value, SourceError> {
        match kind {
            RequestKind::Metrics => self.metrics(input).await,
            RequestKind::Filings => self.filings(input).await,
            RequestKind::BankSearch => self.bank_search(input).await,
            RequestKind::General => {
                Err(SourceError::NotFound("no live lookup for general prompts".into()))
            }
        }
    }
}

fn required_bank(input: &JobInput) -> Result<&str, SourceError> {
    input
        .bank
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| SourceError::NotFound("request names no bank".into()))
}

/// Map a user-facing metric name to its FDIC field (original report naming).
fn metric_field(metric: &str) -> &'static str {
    let lowered = metric.to_ascii_lowercase();
    if lowered.contains("roa") {
        "ROA"
    } else if lowered.contains("roe") {
        "ROE"
    } else if lowered.contains("nim") {
        "NIMY"
    } else if lowered.contains("deposit") {
        "DEP"
    } else if lowered.contains("asset") {
        "ASSET"
    } else if lowered.contains("equity") {
        "EQTOT"
    } else if lowered.contains("loan") {
        "LNLSNET"
    } else {
        "ROA"
    }
}

fn classify_transport(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Upstream(err.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Upstream(format!("API error: {status}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SourceError::Upstream(format!("decode: {e}")))
}
