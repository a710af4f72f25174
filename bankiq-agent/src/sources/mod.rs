//! Upstream data sources and the fallback router.
//!
//! Three sources back a request: live public APIs, the pre-indexed semantic
//! store, and the local upload store. The router decides the order per
//! request; the job manager walks that order until one source yields usable
//! data.

pub mod live;
pub mod preindexed;
pub mod router;
pub mod upload;

pub use live::LiveSource;
pub use preindexed::PreindexedSource;
pub use router::{SourceHit, SourceRouter};
pub use upload::{LocalUploadSource, UploadStore};

use crate::cache::CacheCategory;
use crate::jobs::JobInput;
use async_trait::async_trait;
use bankiq_common::SourceKind;
use thiserror::Error;

/// What a request is actually asking for, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// SEC filing listings (`form_type` present)
    Filings,
    /// Financial metrics, optionally against peers (`metric`, `peer_banks`,
    /// or an upload present)
    Metrics,
    /// Bank identity/profile lookup (`bank` present, nothing more specific)
    BankSearch,
    /// Plain conversational prompt; no source consultation
    General,
}

impl RequestKind {
    pub fn of(input: &JobInput) -> RequestKind {
        if input.form_type.is_some() {
            RequestKind::Filings
        } else if input.metric.is_some() || !input.peer_banks.is_empty() || input.upload_id.is_some()
        {
            RequestKind::Metrics
        } else if input.bank.is_some() {
            RequestKind::BankSearch
        } else {
            RequestKind::General
        }
    }

    /// Cache category for memoizing this request's source data.
    pub fn cache_category(self) -> Option<CacheCategory> {
        match self {
            RequestKind::Filings => Some(CacheCategory::Filings),
            RequestKind::Metrics => Some(CacheCategory::BankMetrics),
            RequestKind::BankSearch => Some(CacheCategory::BankSearch),
            RequestKind::General => None,
        }
    }
}

/// Source-level failures. These trigger fallback to the next source and are
/// only surfaced to the client once the whole chain is exhausted.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The call exceeded the per-source budget
    #[error("source call timed out")]
    Timeout,
    /// Hard upstream error (auth, malformed request, transport)
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The source answered but had no usable data
    #[error("no usable data: {0}")]
    NotFound(String),
}

/// One upstream data source.
///
/// Implementations must be side-effect free on failure so the job manager
/// can walk the fallback chain without cleanup.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn search(
        &self,
        kind: RequestKind,
        input: &JobInput,
    ) -> Result<serde_json::Value, SourceError>;
}
