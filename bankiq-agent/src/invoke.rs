//! AI backend invocation.
//!
//! The backend is an opaque, externally hosted capability: one invocation in,
//! a stream of typed chunks out. The trait keeps the seam narrow so the job
//! manager can run against a scripted fake in tests, and `HttpInvoker` is the
//! production implementation speaking newline-delimited JSON chunks.

use async_trait::async_trait;
use bankiq_common::ChunkPayload;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Invocation failures. These surface as `UpstreamError` on the job unless
/// the job-level ceiling or a cancellation wins first.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("backend stream decode: {0}")]
    Decode(String),
}

/// One invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub prompt: String,
    pub session_id: Option<String>,
    /// Grounding payload fetched by the source router, forwarded verbatim
    pub context: Option<Value>,
}

/// Stream of typed chunks produced by an in-flight invocation.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkPayload, InvokeError>> + Send>>;

/// The opaque invocation capability.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Start an invocation. The returned stream ends when the backend is
    /// done or the cancellation token fires; cancellation is cooperative
    /// and best-effort.
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, InvokeError>;
}

/// HTTP client for the hosted conversational backend.
///
/// The backend responds with one JSON chunk per line:
/// `{"type":"text","payload":"..."}` or `{"type":"data","payload":{...}}`.
/// Lines that fail to decode are carried as text rather than dropped, so a
/// partially conforming backend still yields a readable transcript.
pub struct HttpInvoker {
    http_client: reqwest::Client,
    url: String,
}

impl HttpInvoker {
    pub fn new(url: String) -> bankiq_common::Result<Self> {
        // No request-level timeout here: the job-level ceiling owns the
        // end-to-end budget, and a streamed invocation can legitimately run
        // for minutes.
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| bankiq_common::Error::Internal(format!("http client: {e}")))?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, InvokeError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&serde_json::json!({
                "prompt": request.prompt,
                "session_id": request.session_id,
                "context": request.context,
            }))
            .send()
            .await
            .map_err(|e| InvokeError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvokeError::Backend(format!("backend returned {status}")));
        }

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut pending = String::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Invocation cancelled; dropping backend stream");
                        break;
                    }
                    next = body.next() => {
                        match next {
                            Some(Ok(bytes)) => {
                                match std::str::from_utf8(&bytes) {
                                    Ok(text) => pending.push_str(text),
                                    Err(e) => {
                                        yield Err(InvokeError::Decode(e.to_string()));
                                        break;
                                    }
                                }
                                while let Some(pos) = pending.find('\n') {
                                    let line = pending[..pos].trim().to_string();
                                    pending.drain(..=pos);
                                    if !line.is_empty() {
                                        yield Ok(decode_line(&line));
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                yield Err(InvokeError::Backend(e.to_string()));
                                break;
                            }
                            None => {
                                let tail = pending.trim();
                                if !tail.is_empty() {
                                    yield Ok(decode_line(tail));
                                }
                                break;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn decode_line(line: &str) -> ChunkPayload {
    match serde_json::from_str::<ChunkPayload>(line) {
        Ok(payload) => payload,
        Err(_) => ChunkPayload::Text(line.to_string()),
    }
}
