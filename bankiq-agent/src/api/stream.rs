//! Server-Sent Events delivery of job output.
//!
//! `GET /jobs/{id}/stream` attaches to an existing job: the buffered prefix
//! replays first, then live chunks follow until a terminal event.
//! `GET /stream` submits a new job from query parameters and attaches in the
//! same request, so streaming clients need only one round-trip.

use crate::{
    error::{ApiError, ApiResult},
    jobs::JobInput,
    relay::{Attached, RelayEvent, StreamRelay, Terminal},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use bankiq_common::Chunk;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// GET /stream query parameters; the same shape as POST /jobs with
/// `peer_banks` flattened to a comma-separated list.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub peer_banks: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub from: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub to: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub upload_id: Option<Uuid>,
}

impl From<StreamQuery> for JobInput {
    fn from(query: StreamQuery) -> Self {
        JobInput {
            prompt: query.prompt,
            session_id: query.session_id,
            bank: query.bank,
            peer_banks: query
                .peer_banks
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            metric: query.metric,
            form_type: query.form_type,
            from: query.from,
            to: query.to,
            upload_id: query.upload_id,
        }
    }
}

/// GET /jobs/{id}/stream - attach to an existing job
pub async fn job_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let attached = state
        .relay
        .attach(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))?;

    info!(job_id = %job_id, "SSE client attached to job stream");
    Ok(sse_response(state.relay.clone(), job_id, attached))
}

/// GET /stream - submit a job and stream it in one request
pub async fn submit_and_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = state
        .manager
        .submit(query.into())
        .await
        .map_err(|e| ApiError::BadRequest(e.message))?;

    let attached = state
        .relay
        .attach(job_id)
        .await
        .ok_or_else(|| ApiError::Internal("job channel missing after submit".to_string()))?;

    info!(job_id = %job_id, "SSE client submitted and attached");
    Ok(sse_response(state.relay.clone(), job_id, attached))
}

fn chunk_event(chunk: &Chunk) -> Option<Event> {
    match serde_json::to_string(chunk) {
        Ok(json) => Some(Event::default().event("chunk").data(json)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize chunk for SSE");
            None
        }
    }
}

fn done_event(terminal: &Terminal) -> Option<Event> {
    match serde_json::to_string(terminal) {
        Ok(json) => Some(Event::default().event("done").data(json)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize terminal event for SSE");
            None
        }
    }
}

/// Build the SSE response: replay, then live events, then the terminal
/// frame. If this listener falls behind the broadcast channel it re-attaches
/// and resumes from the buffer by sequence number, preserving the
/// exactly-once, in-order contract.
fn sse_response(
    relay: Arc<StreamRelay>,
    job_id: Uuid,
    attached: Attached,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let Attached { replay, done, mut live } = attached;
        let mut last_seq: Option<u64> = None;

        yield Ok(Event::default().event("job").data(job_id.to_string()));

        for chunk in &replay {
            last_seq = Some(chunk.seq);
            if let Some(event) = chunk_event(chunk) {
                yield Ok(event);
            }
        }
        if let Some(terminal) = done {
            if let Some(event) = done_event(&terminal) {
                yield Ok(event);
            }
            return;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!(job_id = %job_id, "SSE heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = live.recv() => {
                    match received {
                        Ok(RelayEvent::Chunk(chunk)) => {
                            if last_seq.is_some_and(|seen| chunk.seq <= seen) {
                                continue;
                            }
                            last_seq = Some(chunk.seq);
                            if let Some(event) = chunk_event(&chunk) {
                                yield Ok(event);
                            }
                        }
                        Ok(RelayEvent::Done(terminal)) => {
                            if let Some(event) = done_event(&terminal) {
                                yield Ok(event);
                            }
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(job_id = %job_id, skipped, "SSE listener lagged; resyncing from buffer");
                            let Some(resync) = relay.attach(job_id).await else { break };
                            live = resync.live;
                            for chunk in &resync.replay {
                                if last_seq.is_some_and(|seen| chunk.seq <= seen) {
                                    continue;
                                }
                                last_seq = Some(chunk.seq);
                                if let Some(event) = chunk_event(chunk) {
                                    yield Ok(event);
                                }
                            }
                            if let Some(terminal) = resync.done {
                                if let Some(event) = done_event(&terminal) {
                                    yield Ok(event);
                                }
                                break;
                            }
                        }
                        Err(RecvError::Closed) => {
                            debug!(job_id = %job_id, "Relay channel closed");
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}

/// Build streaming routes
pub fn stream_routes() -> Router<AppState> {
    Router::new()
        .route("/stream", get(submit_and_stream))
        .route("/jobs/:job_id/stream", get(job_stream))
}
