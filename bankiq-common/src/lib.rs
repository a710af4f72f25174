//! Shared types for the BankIQ agent gateway.
//!
//! Wire-visible definitions used by the service and by clients: the job
//! status/error taxonomy, the typed chunk protocol, and the broadcast-backed
//! event bus for lifecycle events.

pub mod chunk;
pub mod error;
pub mod events;

pub use chunk::{Chunk, ChunkPayload, ErrorCode, JobError, JobStatus, SourceKind};
pub use error::{Error, Result};
pub use events::{AgentEvent, EventBus};
