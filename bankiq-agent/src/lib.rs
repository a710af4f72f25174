//! bankiq-agent library interface
//!
//! The gateway between synchronous HTTP clients and the slow hosted AI
//! backend: accepts work as jobs, streams or buffers the output, and shields
//! the backend behind a tiered cache and a deterministic source fallback
//! chain. Exposed as a library so integration tests can drive the full
//! router with scripted collaborators.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod invoke;
pub mod jobs;
pub mod relay;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};

use crate::cache::CacheService;
use crate::config::AgentConfig;
use crate::invoke::{HttpInvoker, Invoker};
use crate::jobs::{JobManager, JobSettings};
use crate::relay::StreamRelay;
use crate::sources::{
    DataSource, LiveSource, LocalUploadSource, PreindexedSource, SourceRouter, UploadStore,
};
use axum::Router;
use bankiq_common::EventBus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Broadcast capacity for per-job chunk channels and the lifecycle bus.
const CHANNEL_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job lifecycle owner
    pub manager: JobManager,
    /// Category-aware response cache
    pub cache: Arc<CacheService>,
    /// Per-job chunk buffers and fan-out
    pub relay: Arc<StreamRelay>,
    /// Uploaded peer-data documents
    pub uploads: Arc<UploadStore>,
    /// Lifecycle event bus for the admin SSE stream
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Assemble state from pre-built services. Tests use this entry point to
    /// inject scripted sources and invokers.
    pub fn assemble(
        config: &AgentConfig,
        invoker: Arc<dyn Invoker>,
        extra_sources: Vec<Arc<dyn DataSource>>,
    ) -> Self {
        let cache = Arc::new(CacheService::new(
            config.cache_ttl_filings,
            config.cache_ttl_metrics,
            config.cache_ttl_search,
        ));
        let relay = Arc::new(StreamRelay::new(CHANNEL_CAPACITY));
        let uploads = Arc::new(UploadStore::new());
        let event_bus = EventBus::new(CHANNEL_CAPACITY);

        let mut sources: Vec<Arc<dyn DataSource>> =
            vec![Arc::new(LocalUploadSource::new(uploads.clone()))];
        sources.extend(extra_sources);

        let router = Arc::new(SourceRouter::new(
            cache.clone(),
            config.source_timeout,
            sources,
        ));

        let manager = JobManager::new(
            relay.clone(),
            router,
            invoker,
            event_bus.clone(),
            JobSettings {
                job_timeout: config.job_timeout,
                job_retention: config.job_retention,
                sweep_interval: config.sweep_interval,
            },
        );

        Self {
            manager,
            cache,
            relay,
            uploads,
            event_bus,
            startup_time: Utc::now(),
        }
    }

    /// Wire the production service graph: live FDIC/EDGAR clients, the
    /// knowledge-base client, and the HTTP invoker for the hosted backend.
    pub fn from_config(config: &AgentConfig) -> bankiq_common::Result<Self> {
        let invoker: Arc<dyn Invoker> = Arc::new(HttpInvoker::new(config.backend_url.clone())?);
        let live: Arc<dyn DataSource> = Arc::new(LiveSource::new(
            config.fdic_base_url.clone(),
            config.edgar_base_url.clone(),
        )?);
        let preindexed: Arc<dyn DataSource> =
            Arc::new(PreindexedSource::new(config.knowledge_base_url.clone())?);

        Ok(Self::assemble(config, invoker, vec![live, preindexed]))
    }

    /// Start background work (the retention sweeper).
    pub fn start(&self) {
        self.manager.start();
    }

    /// Stop background work and signal in-flight jobs to cancel.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::job_routes())
        .merge(api::stream_routes())
        .merge(api::upload_routes())
        .merge(api::admin_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
