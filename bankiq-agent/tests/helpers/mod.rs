//! Shared helpers for integration tests: scripted collaborators and
//! router-level request utilities.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bankiq_agent::config::AgentConfig;
use bankiq_agent::invoke::{ChunkStream, InvokeError, InvokeRequest, Invoker};
use bankiq_agent::jobs::JobInput;
use bankiq_agent::relay::{Attached, RelayEvent, Terminal};
use bankiq_agent::sources::{DataSource, RequestKind, SourceError};
use bankiq_agent::AppState;
use bankiq_common::{ChunkPayload, SourceKind};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Config with timeouts sized for tests.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.job_timeout = Duration::from_secs(5);
    config.source_timeout = Duration::from_secs(1);
    config
}

/// App state wired with scripted collaborators.
pub fn test_state(invoker: Arc<dyn Invoker>, sources: Vec<Arc<dyn DataSource>>) -> AppState {
    AppState::assemble(&test_config(), invoker, sources)
}

/// Invoker that replays fixed chunks, optionally pausing before each one.
pub struct ScriptedInvoker {
    chunks: Vec<ChunkPayload>,
    chunk_delay: Duration,
}

impl ScriptedInvoker {
    pub fn text(parts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: parts
                .iter()
                .map(|p| ChunkPayload::Text(p.to_string()))
                .collect(),
            chunk_delay: Duration::ZERO,
        })
    }

    pub fn slow(parts: &[&str], chunk_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks: parts
                .iter()
                .map(|p| ChunkPayload::Text(p.to_string()))
                .collect(),
            chunk_delay,
        })
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, InvokeError> {
        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            for chunk in chunks {
                if delay > Duration::ZERO {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    break;
                }
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// How a fake source answers each call.
pub enum FakeBehavior {
    Succeed(Value),
    NotFound,
    Upstream,
}

/// Data source with a fixed behavior and a call counter.
pub struct FakeSource {
    kind: SourceKind,
    behavior: FakeBehavior,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(kind: SourceKind, behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FakeSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, _kind: RequestKind, _input: &JobInput) -> Result<Value, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            FakeBehavior::Succeed(value) => Ok(value.clone()),
            FakeBehavior::NotFound => Err(SourceError::NotFound("fake: nothing here".into())),
            FakeBehavior::Upstream => Err(SourceError::Upstream("fake: hard failure".into())),
        }
    }
}

/// One JSON request through the router; returns status and parsed body.
pub async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll job status until it reaches a terminal state.
pub async fn wait_terminal(app: &Router, job_id: &str) -> Value {
    for _ in 0..400 {
        let (status, body) = request_json(app, "GET", &format!("/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK, "status poll failed: {body}");
        let state = body["status"].as_str().unwrap_or_default().to_string();
        if matches!(state.as_str(), "completed" | "failed" | "cancelled") {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

/// Drain an attached relay listener: replayed and live chunks in order, then
/// the terminal frame.
pub async fn collect_stream(attached: Attached) -> (Vec<bankiq_common::Chunk>, Terminal) {
    let Attached {
        replay,
        done,
        mut live,
    } = attached;
    let mut chunks = replay;
    if let Some(terminal) = done {
        return (chunks, terminal);
    }
    loop {
        match tokio::time::timeout(Duration::from_secs(5), live.recv())
            .await
            .expect("stream stalled")
        {
            Ok(RelayEvent::Chunk(chunk)) => chunks.push(chunk),
            Ok(RelayEvent::Done(terminal)) => return (chunks, terminal),
            Err(e) => panic!("relay receive failed: {e}"),
        }
    }
}
