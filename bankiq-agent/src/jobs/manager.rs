//! Job lifecycle management.
//!
//! The manager owns the registry, every state transition, dispatch of the
//! background execution task, the per-job ceiling, cooperative cancellation,
//! and eviction of terminal jobs after the retention window. Handlers only
//! ever see snapshots.

use crate::invoke::{InvokeRequest, Invoker};
use crate::jobs::{Job, JobInput};
use crate::relay::{StreamRelay, Terminal};
use crate::sources::SourceRouter;
use bankiq_common::{
    AgentEvent, ChunkPayload, ErrorCode, EventBus, JobError, JobStatus, SourceKind,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Manager timing knobs, lifted from AgentConfig at construction.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Overall per-job ceiling
    pub job_timeout: Duration,
    /// How long terminal jobs stay readable
    pub job_retention: Duration,
    /// Sweeper cadence
    pub sweep_interval: Duration,
}

/// Outcome of a result fetch.
pub enum ResultOutcome {
    Completed(String),
    Failed(JobError),
    Cancelled,
    /// Not terminal yet; carries the current status for the conflict body
    Pending(JobStatus),
}

enum ExecOutcome {
    Completed(Option<SourceKind>),
    Failed(JobError),
    Cancelled,
    TimedOut,
}

/// Cheaply clone-able handle over shared job state; every clone sees the
/// same registry, tokens, and collaborators.
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    cancel_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    relay: Arc<StreamRelay>,
    router: Arc<SourceRouter>,
    invoker: Arc<dyn Invoker>,
    event_bus: EventBus,
    settings: JobSettings,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(
        relay: Arc<StreamRelay>,
        router: Arc<SourceRouter>,
        invoker: Arc<dyn Invoker>,
        event_bus: EventBus,
        settings: JobSettings,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            relay,
            router,
            invoker,
            event_bus,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the retention sweeper. Call once after construction.
    pub fn start(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.settings.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => {
                        debug!("Retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        });
    }

    /// Stop background work. In-flight jobs are signalled to cancel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tokens: Vec<CancellationToken> =
            self.cancel_tokens.read().await.values().cloned().collect();
        for token in tokens {
            token.cancel();
        }
    }

    /// Accept a unit of work. Validation failures reject synchronously and
    /// create no job; otherwise the execution task is dispatched immediately
    /// and the call returns without waiting on it.
    pub async fn submit(&self, input: JobInput) -> Result<Uuid, JobError> {
        input.validate()?;

        let job = Job::new(input);
        let id = job.id;
        let token = CancellationToken::new();

        self.relay.open(id).await;
        self.jobs.write().await.insert(id, job);
        self.cancel_tokens.write().await.insert(id, token.clone());
        self.event_bus.emit_lossy(AgentEvent::JobQueued {
            job_id: id,
            timestamp: Utc::now(),
        });
        info!(job_id = %id, "Job accepted");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.execute(id, token).await;
        });

        Ok(id)
    }

    /// Snapshot of one job.
    pub async fn status(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Snapshots of all retained jobs, newest first (admin surface).
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Result fetch; `Pending` maps to a conflict at the API layer.
    pub async fn result(&self, id: Uuid) -> Option<ResultOutcome> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id)?;
        Some(match job.status {
            JobStatus::Completed => {
                ResultOutcome::Completed(job.result.clone().unwrap_or_default())
            }
            JobStatus::Failed => ResultOutcome::Failed(
                job.error
                    .clone()
                    .unwrap_or_else(|| JobError::new(ErrorCode::UpstreamError, "unrecorded error")),
            ),
            JobStatus::Cancelled => ResultOutcome::Cancelled,
            status => ResultOutcome::Pending(status),
        })
    }

    /// Cancel a job. Returns None for unknown ids, `false` for jobs already
    /// terminal (idempotent no-op), `true` when this call performed the
    /// cancellation. By the time `true` is returned the relay is finished,
    /// so no further chunks reach any listener.
    pub async fn cancel(&self, id: Uuid) -> Option<bool> {
        {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(&id)?;
            if !job.try_transition(JobStatus::Cancelled) {
                return Some(false);
            }
        }

        if let Some(token) = self.cancel_tokens.read().await.get(&id) {
            token.cancel();
        }
        self.relay
            .finish(
                id,
                Terminal {
                    status: JobStatus::Cancelled,
                    source: None,
                    error: None,
                },
            )
            .await;
        self.event_bus.emit_lossy(AgentEvent::JobCancelled {
            job_id: id,
            timestamp: Utc::now(),
        });
        info!(job_id = %id, "Job cancelled by client");
        Some(true)
    }

    /// Background execution task: one per job, the job's single writer for
    /// the running phase.
    async fn execute(self, id: Uuid, cancel: CancellationToken) {
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else { return };
            // A pre-dispatch cancellation already closed the job.
            if !job.try_transition(JobStatus::Running) {
                return;
            }
        }
        self.event_bus.emit_lossy(AgentEvent::JobStarted {
            job_id: id,
            timestamp: Utc::now(),
        });
        debug!(job_id = %id, "Job dispatched");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => ExecOutcome::Cancelled,
            run = tokio::time::timeout(self.settings.job_timeout, self.run(id, &cancel)) => {
                match run {
                    Ok(Ok(source)) => ExecOutcome::Completed(source),
                    Ok(Err(err)) => ExecOutcome::Failed(err),
                    Err(_elapsed) => ExecOutcome::TimedOut,
                }
            }
        };

        match outcome {
            ExecOutcome::Completed(source) => self.finish_completed(id, source).await,
            ExecOutcome::Failed(err) => self.finish_failed(id, err).await,
            ExecOutcome::TimedOut => {
                // Stop the in-flight invocation before recording the failure.
                cancel.cancel();
                warn!(
                    job_id = %id,
                    ceiling_secs = self.settings.job_timeout.as_secs(),
                    "Job exceeded its ceiling"
                );
                self.finish_failed(
                    id,
                    JobError::new(ErrorCode::JobTimeout, "job exceeded its time ceiling"),
                )
                .await;
            }
            ExecOutcome::Cancelled => {
                // The cancel() call usually performed the terminal
                // transition already; this covers direct token cancellation
                // on shutdown.
                self.finish_cancelled(id).await;
            }
        }
    }

    /// The job pipeline: resolve and fetch grounding data, then stream the
    /// invocation into the relay.
    async fn run(&self, id: Uuid, cancel: &CancellationToken) -> Result<Option<SourceKind>, JobError> {
        let input = {
            let jobs = self.jobs.read().await;
            jobs.get(&id)
                .map(|job| job.input.clone())
                .ok_or_else(|| JobError::new(ErrorCode::UpstreamError, "job evicted mid-flight"))?
        };

        let hit = self.router.fetch(&input).await?;
        let (source, context) = match hit {
            Some(hit) => {
                // Structured payload goes out as a data chunk so clients
                // never reconstruct it from prose.
                self.relay
                    .push(
                        id,
                        ChunkPayload::Data(json!({
                            "source": hit.source.as_str(),
                            "data": hit.data.clone(),
                        })),
                    )
                    .await;
                (Some(hit.source), Some(hit.data))
            }
            None => (None, None),
        };

        let request = InvokeRequest {
            prompt: input.prompt.clone(),
            session_id: input.session_id.clone(),
            context,
        };
        let mut stream = self
            .invoker
            .invoke(request, cancel.child_token())
            .await
            .map_err(|e| JobError::new(ErrorCode::UpstreamError, e.to_string()))?;

        while let Some(item) = stream.next().await {
            match item {
                Ok(payload) => {
                    self.relay.push(id, payload).await;
                }
                Err(e) => {
                    return Err(JobError::new(ErrorCode::UpstreamError, e.to_string()));
                }
            }
        }

        Ok(source)
    }

    async fn finish_completed(&self, id: Uuid, source: Option<SourceKind>) {
        let transcript = self.relay.transcript(id).await;
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else { return };
            // A racing cancellation wins; the transcript stays retrievable
            // through the relay buffer either way.
            if !job.try_transition(JobStatus::Completed) {
                return;
            }
            job.result = Some(transcript);
            job.source_used = source;
        }
        self.relay
            .finish(
                id,
                Terminal {
                    status: JobStatus::Completed,
                    source,
                    error: None,
                },
            )
            .await;
        self.event_bus.emit_lossy(AgentEvent::JobCompleted {
            job_id: id,
            source,
            timestamp: Utc::now(),
        });
        info!(job_id = %id, source = ?source, "Job completed");
    }

    async fn finish_failed(&self, id: Uuid, err: JobError) {
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else { return };
            if !job.try_transition(JobStatus::Failed) {
                return;
            }
            job.error = Some(err.clone());
        }
        self.relay
            .finish(
                id,
                Terminal {
                    status: JobStatus::Failed,
                    source: None,
                    error: Some(err.clone()),
                },
            )
            .await;
        self.event_bus.emit_lossy(AgentEvent::JobFailed {
            job_id: id,
            error: err.clone(),
            timestamp: Utc::now(),
        });
        error!(job_id = %id, code = ?err.code, error = %err.message, "Job failed");
    }

    async fn finish_cancelled(&self, id: Uuid) {
        let transitioned = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&id) {
                Some(job) => job.try_transition(JobStatus::Cancelled),
                None => false,
            }
        };
        if !transitioned {
            return;
        }
        self.relay
            .finish(
                id,
                Terminal {
                    status: JobStatus::Cancelled,
                    source: None,
                    error: None,
                },
            )
            .await;
        self.event_bus.emit_lossy(AgentEvent::JobCancelled {
            job_id: id,
            timestamp: Utc::now(),
        });
    }

    /// Evict terminal jobs past the retention window.
    pub(crate) async fn sweep(&self) {
        let retention = chrono::Duration::from_std(self.settings.job_retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let cutoff = Utc::now() - retention;

        let expired: Vec<Uuid> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|job| {
                    job.is_terminal() && job.finished_at.is_some_and(|at| at <= cutoff)
                })
                .map(|job| job.id)
                .collect()
        };
        if expired.is_empty() {
            return;
        }

        {
            let mut jobs = self.jobs.write().await;
            for id in &expired {
                jobs.remove(id);
            }
        }
        {
            let mut tokens = self.cancel_tokens.write().await;
            for id in &expired {
                tokens.remove(id);
            }
        }
        for id in &expired {
            self.relay.close(*id).await;
        }
        info!(evicted = expired.len(), "Retention sweep evicted terminal jobs");
    }
}
