//! Job status taxonomy and the typed chunk protocol.
//!
//! Streaming invocations emit discriminated chunks (`text` vs `data`) so the
//! relay and UI never have to scrape structured payloads out of prose.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a submitted job.
///
/// Transitions are owned by the job manager:
/// `Queued -> Running -> Completed | Failed`, and `Queued | Running ->
/// Cancelled`. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Failure taxonomy surfaced to clients.
///
/// Source-level codes (`UpstreamTimeout`, `UpstreamError`) normally recover
/// via fallback and only reach a client when the fallback chain is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// An individual source call exceeded its budget.
    UpstreamTimeout,
    /// A source or the AI backend returned a hard error.
    UpstreamError,
    /// Every source in the fallback chain was exhausted.
    NoDataAvailable,
    /// The job exceeded its overall ceiling.
    JobTimeout,
    /// Client-requested cancellation (not an error condition).
    Cancelled,
    /// Malformed input rejected at submission time.
    InvalidRequest,
}

/// Terminal error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Upstream data source kinds, in the order the router may schedule them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Live public APIs (FDIC financials, SEC EDGAR submissions).
    Live,
    /// Pre-indexed semantic store (bounded coverage set and time window).
    Preindexed,
    /// Caller-uploaded peer data held in the local upload store.
    LocalUpload,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Live => "live",
            SourceKind::Preindexed => "preindexed",
            SourceKind::LocalUpload => "local_upload",
        }
    }
}

/// Discriminated chunk body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChunkPayload {
    /// Incremental prose from the AI backend.
    Text(String),
    /// Structured payload (chart data, source attribution) emitted as-is.
    Data(serde_json::Value),
}

/// One element of a job's output sequence.
///
/// `seq` is assigned by the relay when the chunk is buffered and is strictly
/// increasing per job, so late-attaching listeners can resume without
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub seq: u64,
    pub payload: ChunkPayload,
}

impl Chunk {
    /// Text content, if this is a text chunk.
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            ChunkPayload::Text(text) => Some(text),
            ChunkPayload::Data(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn chunk_payload_is_discriminated_on_the_wire() {
        let chunk = Chunk {
            seq: 3,
            payload: ChunkPayload::Data(serde_json::json!({"rows": []})),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["payload"]["type"], "data");

        let text = Chunk {
            seq: 4,
            payload: ChunkPayload::Text("net interest margin".into()),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["payload"]["type"], "text");
        assert_eq!(json["payload"]["payload"], "net interest margin");
    }

    #[test]
    fn error_code_round_trips() {
        let err = JobError::new(ErrorCode::NoDataAvailable, "all sources exhausted");
        let json = serde_json::to_string(&err).unwrap();
        let back: JobError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, ErrorCode::NoDataAvailable);
    }
}
