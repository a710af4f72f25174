//! Streaming relay: buffers every chunk a job produces and fans live chunks
//! out to any number of attached listeners.
//!
//! Each job owns one channel: an ordered buffer plus a `tokio::broadcast`
//! sender. Attaching snapshots the buffer and subscribes under the same lock
//! that appends hold, so the replay/live boundary neither drops nor
//! duplicates a chunk. Listeners are independent fan-out consumers, never
//! competing ones.

use bankiq_common::{Chunk, ChunkPayload, JobError, JobStatus, SourceKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Terminal frame delivered to every listener after the last chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Terminal {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Items observed by live listeners.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Chunk(Chunk),
    Done(Terminal),
}

struct ChannelState {
    buffer: Vec<Chunk>,
    done: Option<Terminal>,
    tx: broadcast::Sender<RelayEvent>,
}

/// What an attaching listener receives: the buffered prefix, the terminal
/// frame if the job already ended, and a live receiver for everything after
/// the snapshot.
pub struct Attached {
    pub replay: Vec<Chunk>,
    pub done: Option<Terminal>,
    pub live: broadcast::Receiver<RelayEvent>,
}

/// Per-job chunk buffer and broadcast fan-out.
pub struct StreamRelay {
    capacity: usize,
    channels: RwLock<HashMap<Uuid, Arc<Mutex<ChannelState>>>>,
}

impl StreamRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Create the channel for a newly submitted job.
    pub async fn open(&self, job_id: Uuid) {
        let (tx, _) = broadcast::channel(self.capacity);
        let state = ChannelState {
            buffer: Vec::new(),
            done: None,
            tx,
        };
        self.channels
            .write()
            .await
            .insert(job_id, Arc::new(Mutex::new(state)));
    }

    fn channel(
        channels: &HashMap<Uuid, Arc<Mutex<ChannelState>>>,
        job_id: Uuid,
    ) -> Option<Arc<Mutex<ChannelState>>> {
        channels.get(&job_id).cloned()
    }

    /// Append a chunk and broadcast it to live listeners.
    ///
    /// Returns the assigned sequence number, or None when the channel is
    /// unknown or already finished. Chunks arriving after the terminal frame
    /// (e.g. racing a cancellation) are dropped, which is what keeps
    /// "no chunks after cancel returns" honest.
    pub async fn push(&self, job_id: Uuid, payload: ChunkPayload) -> Option<u64> {
        let channel = Self::channel(&*self.channels.read().await, job_id)?;
        let mut state = channel.lock().await;
        if state.done.is_some() {
            debug!(job_id = %job_id, "Dropping chunk for finished channel");
            return None;
        }
        let chunk = Chunk {
            seq: state.buffer.len() as u64,
            payload,
        };
        state.buffer.push(chunk.clone());
        let seq = chunk.seq;
        let _ = state.tx.send(RelayEvent::Chunk(chunk));
        Some(seq)
    }

    /// Record the terminal frame and broadcast it.
    ///
    /// Idempotent: only the first terminal sticks; later calls are no-ops so
    /// a cancellation handler and the execution task can both try.
    pub async fn finish(&self, job_id: Uuid, terminal: Terminal) -> bool {
        let Some(channel) = Self::channel(&*self.channels.read().await, job_id) else {
            return false;
        };
        let mut state = channel.lock().await;
        if state.done.is_some() {
            return false;
        }
        state.done = Some(terminal.clone());
        let _ = state.tx.send(RelayEvent::Done(terminal));
        true
    }

    /// Attach a listener: buffered prefix plus a live subscription, taken
    /// atomically with respect to `push`/`finish`.
    pub async fn attach(&self, job_id: Uuid) -> Option<Attached> {
        let channel = Self::channel(&*self.channels.read().await, job_id)?;
        let state = channel.lock().await;
        Some(Attached {
            replay: state.buffer.clone(),
            done: state.done.clone(),
            live: state.tx.subscribe(),
        })
    }

    /// Full buffered sequence so far (for lag recovery and result assembly).
    pub async fn buffered(&self, job_id: Uuid) -> Vec<Chunk> {
        match Self::channel(&*self.channels.read().await, job_id) {
            Some(channel) => channel.lock().await.buffer.clone(),
            None => Vec::new(),
        }
    }

    /// Concatenation of all text chunks, the canonical completed result.
    pub async fn transcript(&self, job_id: Uuid) -> String {
        self.buffered(job_id)
            .await
            .iter()
            .filter_map(Chunk::as_text)
            .collect()
    }

    /// Drop a job's channel once the job is evicted.
    pub async fn close(&self, job_id: Uuid) {
        self.channels.write().await.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankiq_common::ErrorCode;

    fn text(s: &str) -> ChunkPayload {
        ChunkPayload::Text(s.to_string())
    }

    fn completed() -> Terminal {
        Terminal {
            status: JobStatus::Completed,
            source: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn replay_then_live_without_gaps_or_duplicates() {
        let relay = StreamRelay::new(64);
        let id = Uuid::new_v4();
        relay.open(id).await;

        relay.push(id, text("A")).await.unwrap();
        relay.push(id, text("B")).await.unwrap();

        let mut attached = relay.attach(id).await.unwrap();
        assert_eq!(attached.replay.len(), 2);
        assert!(attached.done.is_none());

        relay.push(id, text("C")).await.unwrap();
        relay.finish(id, completed()).await;

        match attached.live.recv().await.unwrap() {
            RelayEvent::Chunk(chunk) => {
                assert_eq!(chunk.seq, 2);
                assert_eq!(chunk.as_text(), Some("C"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert!(matches!(
            attached.live.recv().await.unwrap(),
            RelayEvent::Done(_)
        ));
    }

    #[tokio::test]
    async fn multiple_listeners_each_see_the_full_sequence() {
        let relay = StreamRelay::new(64);
        let id = Uuid::new_v4();
        relay.open(id).await;

        let mut first = relay.attach(id).await.unwrap();
        let mut second = relay.attach(id).await.unwrap();

        relay.push(id, text("x")).await.unwrap();

        for listener in [&mut first.live, &mut second.live] {
            match listener.recv().await.unwrap() {
                RelayEvent::Chunk(chunk) => assert_eq!(chunk.as_text(), Some("x")),
                other => panic!("expected chunk, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn chunks_after_finish_are_dropped() {
        let relay = StreamRelay::new(64);
        let id = Uuid::new_v4();
        relay.open(id).await;

        relay.push(id, text("kept")).await.unwrap();
        relay
            .finish(
                id,
                Terminal {
                    status: JobStatus::Cancelled,
                    source: None,
                    error: None,
                },
            )
            .await;

        assert!(relay.push(id, text("late")).await.is_none());
        assert_eq!(relay.transcript(id).await, "kept");
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let relay = StreamRelay::new(8);
        let id = Uuid::new_v4();
        relay.open(id).await;

        assert!(relay.finish(id, completed()).await);
        let second = Terminal {
            status: JobStatus::Failed,
            source: None,
            error: Some(JobError::new(ErrorCode::JobTimeout, "late")),
        };
        assert!(!relay.finish(id, second).await);

        let attached = relay.attach(id).await.unwrap();
        assert_eq!(attached.done.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn transcript_concatenates_text_chunks_only() {
        let relay = StreamRelay::new(8);
        let id = Uuid::new_v4();
        relay.open(id).await;

        relay
            .push(id, ChunkPayload::Data(serde_json::json!({"rows": [1]})))
            .await
            .unwrap();
        relay.push(id, text("AB")).await.unwrap();
        relay.push(id, text("C")).await.unwrap();

        assert_eq!(relay.transcript(id).await, "ABC");
    }

    #[tokio::test]
    async fn attach_on_unknown_job_is_none() {
        let relay = StreamRelay::new(8);
        assert!(relay.attach(Uuid::new_v4()).await.is_none());
    }
}
