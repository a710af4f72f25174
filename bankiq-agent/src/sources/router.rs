//! Source preference resolution and fallback execution.
//!
//! `resolve` is a pure function of the request: the same bank, timeframe,
//! and upload context always produce the same ordered source list. `fetch`
//! walks that list with a per-call timeout, memoizes wins in the cache, and
//! reports exhaustion with the taxonomy code the client needs.

use super::{preindexed, DataSource, RequestKind, SourceError};
use crate::cache::{CacheCategory, CacheService};
use crate::jobs::JobInput;
use bankiq_common::{ErrorCode, JobError, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A satisfied lookup: the winning source and its payload. This is also the
/// cached representation, so cache hits keep their original attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHit {
    pub source: SourceKind,
    pub data: Value,
}

pub struct SourceRouter {
    sources: Vec<Arc<dyn DataSource>>,
    cache: Arc<CacheService>,
    source_timeout: Duration,
}

impl SourceRouter {
    pub fn new(
        cache: Arc<CacheService>,
        source_timeout: Duration,
        sources: Vec<Arc<dyn DataSource>>,
    ) -> Self {
        Self {
            sources,
            cache,
            source_timeout,
        }
    }

    /// Ordered fallback chain for a request. Deterministic given identical
    /// input.
    pub fn resolve(&self, input: &JobInput) -> Vec<SourceKind> {
        if RequestKind::of(input) == RequestKind::General {
            return Vec::new();
        }
        if input.upload_id.is_some() {
            return vec![SourceKind::LocalUpload, SourceKind::Live];
        }
        let covered = input
            .bank
            .as_deref()
            .map(preindexed::covers_bank)
            .unwrap_or(false);
        if covered && preindexed::covers_timeframe(input.from, input.to) {
            return vec![SourceKind::Preindexed, SourceKind::Live];
        }
        vec![SourceKind::Live]
    }

    /// Fetch grounding data for a request.
    ///
    /// Returns `Ok(None)` for general prompts (no source consultation),
    /// `Ok(Some(hit))` when a source or the cache satisfied the request, and
    /// the taxonomy error once the chain is exhausted: `NoDataAvailable`,
    /// except when the final source specifically timed out, which surfaces
    /// as `UpstreamTimeout`.
    pub async fn fetch(&self, input: &JobInput) -> Result<Option<SourceHit>, JobError> {
        let kind = RequestKind::of(input);
        let Some(category) = kind.cache_category() else {
            return Ok(None);
        };

        // Uploads are already local and per-document; only API-backed
        // lookups are worth memoizing.
        let cache_key = match (&input.bank, input.upload_id) {
            (Some(bank), None) => Some(CacheService::key(bank, &detail_of(kind, input))),
            _ => None,
        };

        if let Some(key) = &cache_key {
            if let Some(value) = self.cache.get(category, key).await {
                match serde_json::from_value::<SourceHit>(value) {
                    Ok(hit) => return Ok(Some(hit)),
                    // A malformed cache entry is a miss, never a failure.
                    Err(e) => debug!(key, error = %e, "Discarding undecodable cache entry"),
                }
            }
        }

        let plan = self.resolve(input);
        let mut last_error: Option<SourceError> = None;

        for source_kind in plan {
            let Some(source) = self.sources.iter().find(|s| s.kind() == source_kind) else {
                warn!(source = source_kind.as_str(), "Resolved source not configured");
                last_error = Some(SourceError::Upstream("source not configured".into()));
                continue;
            };

            match tokio::time::timeout(self.source_timeout, source.search(kind, input)).await {
                Ok(Ok(data)) => {
                    info!(
                        source = source_kind.as_str(),
                        "Source satisfied request"
                    );
                    let hit = SourceHit {
                        source: source_kind,
                        data,
                    };
                    if let Some(key) = cache_key {
                        if let Ok(value) = serde_json::to_value(&hit) {
                            self.cache.set(category, key, value).await;
                        }
                    }
                    return Ok(Some(hit));
                }
                Ok(Err(err)) => {
                    warn!(
                        source = source_kind.as_str(),
                        error = %err,
                        "Source failed, trying next"
                    );
                    last_error = Some(err);
                }
                Err(_elapsed) => {
                    warn!(
                        source = source_kind.as_str(),
                        budget_ms = self.source_timeout.as_millis() as u64,
                        "Source call exceeded its budget, trying next"
                    );
                    last_error = Some(SourceError::Timeout);
                }
            }
        }

        Err(match last_error {
            Some(SourceError::Timeout) => JobError::new(
                ErrorCode::UpstreamTimeout,
                "final fallback source timed out",
            ),
            _ => JobError::new(
                ErrorCode::NoDataAvailable,
                "all data sources exhausted for this request",
            ),
        })
    }
}

fn detail_of(kind: RequestKind, input: &JobInput) -> String {
    match kind {
        RequestKind::Filings => input.form_type.clone().unwrap_or_else(|| "10-K".into()),
        RequestKind::Metrics => {
            let metric = input.metric.clone().unwrap_or_else(|| "ROA".into());
            if input.peer_banks.is_empty() {
                metric
            } else {
                format!("{} vs {}", metric, input.peer_banks.join("+"))
            }
        }
        RequestKind::BankSearch => "profile".into(),
        RequestKind::General => String::new(),
    }
}
