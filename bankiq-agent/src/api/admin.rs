//! Admin/introspection handlers
//!
//! Read-only views of cache and job state for operational diagnosis, plus
//! explicit cache invalidation and a lifecycle event stream.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    cache::CacheCategory,
    error::{ApiError, ApiResult},
    AppState,
};
use bankiq_common::AgentEvent;

/// GET /admin/cache-stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "categories": state.cache.stats().await }))
}

/// POST /admin/cache-clear request
#[derive(Debug, Deserialize)]
pub struct CacheClearRequest {
    /// A category name, or "all"
    pub category: String,
}

/// POST /admin/cache-clear
pub async fn cache_clear(
    State(state): State<AppState>,
    Json(request): Json<CacheClearRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let target = request.category.trim();
    let category = if target.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(CacheCategory::parse(target).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown cache category: {target}"))
        })?)
    };

    state.cache.invalidate(category).await;
    state.event_bus.emit_lossy(AgentEvent::CacheCleared {
        category: category.map(|c| c.as_str().to_string()),
        timestamp: Utc::now(),
    });
    info!(category = %target, "Cache cleared via admin surface");

    Ok(Json(json!({
        "cleared": category.map(|c| c.as_str()).unwrap_or("all")
    })))
}

/// GET /admin/jobs - snapshots of every retained job, newest first
pub async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let jobs: Vec<serde_json::Value> = state
        .manager
        .list()
        .await
        .into_iter()
        .map(|job| {
            json!({
                "job_id": job.id,
                "status": job.status,
                "source": job.source_used,
                "created_at": job.created_at,
                "started_at": job.started_at,
                "finished_at": job.finished_at,
                "error": job.error,
            })
        })
        .collect();
    Json(json!({ "jobs": jobs }))
}

/// GET /admin/events - SSE stream of lifecycle events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to lifecycle events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                Ok(event) = rx.recv() => {
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            yield Ok(Event::default()
                                .event(event_type)
                                .data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Build admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/cache-stats", get(cache_stats))
        .route("/admin/cache-clear", post(cache_clear))
        .route("/admin/jobs", get(list_jobs))
        .route("/admin/events", get(event_stream))
}
