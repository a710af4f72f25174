//! Job data model and state machine.

use bankiq_common::{ErrorCode, JobError, JobStatus, SourceKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Original request payload carried by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    /// Prompt forwarded to the AI backend
    pub prompt: String,
    /// Conversation continuity handle for the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Subject bank, when the request is about one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    /// Peer banks for comparison requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_banks: Vec<String>,
    /// Metric of interest (ROA, ROE, NIM, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// SEC form type for filings requests (10-K, 10-Q)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    /// Requested time range, used for pre-indexed window routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
    /// Previously uploaded peer-data document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<Uuid>,
}

impl JobInput {
    /// Plain conversational input with no bank context.
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: None,
            bank: None,
            peer_banks: Vec::new(),
            metric: None,
            form_type: None,
            from: None,
            to: None,
            upload_id: None,
        }
    }

    /// Synchronous submission-time validation. Failures reject the request
    /// before any job exists.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.prompt.trim().is_empty() {
            return Err(JobError::new(ErrorCode::InvalidRequest, "prompt is empty"));
        }
        if let Some(form) = &self.form_type {
            let form = form.trim().to_ascii_uppercase();
            if form != "10-K" && form != "10-Q" {
                return Err(JobError::new(
                    ErrorCode::InvalidRequest,
                    format!("unsupported form type: {form}"),
                ));
            }
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(JobError::new(
                    ErrorCode::InvalidRequest,
                    "timeframe start is after its end",
                ));
            }
        }
        Ok(())
    }
}

/// One tracked unit of asynchronous work.
///
/// Only the job manager mutates a Job; everything handed to handlers is a
/// snapshot clone.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub input: JobInput,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Present only once status is `completed`; immutable afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Present only once status is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Which source ultimately satisfied the request (observability)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_used: Option<SourceKind>,
}

impl Job {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            input,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            source_used: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a state transition if the edge is legal; illegal transitions
    /// are rejected as no-ops, never errors. Timestamps are maintained here
    /// so every writer gets them right.
    pub fn try_transition(&mut self, to: JobStatus) -> bool {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        );
        if !allowed {
            return false;
        }
        self.status = to;
        match to {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            _ if to.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_path_queued_running_completed() {
        let mut job = Job::new(JobInput::chat("hello"));
        assert!(job.try_transition(JobStatus::Running));
        assert!(job.started_at.is_some());
        assert!(job.try_transition(JobStatus::Completed));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn terminal_states_are_closed() {
        let mut job = Job::new(JobInput::chat("hello"));
        job.try_transition(JobStatus::Running);
        job.try_transition(JobStatus::Failed);

        for to in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Cancelled,
        ] {
            assert!(!job.try_transition(to), "failed job must reject {to:?}");
        }
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn queued_jobs_can_be_cancelled_before_dispatch() {
        let mut job = Job::new(JobInput::chat("hello"));
        assert!(job.try_transition(JobStatus::Cancelled));
        assert!(job.finished_at.is_some());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn completed_cannot_be_reached_from_queued() {
        let mut job = Job::new(JobInput::chat("hello"));
        assert!(!job.try_transition(JobStatus::Completed));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn validation_rejects_blank_prompt_and_bad_forms() {
        assert!(JobInput::chat("  ").validate().is_err());

        let mut input = JobInput::chat("filings please");
        input.form_type = Some("8-K".into());
        assert!(input.validate().is_err());

        input.form_type = Some("10-k".into());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn validation_rejects_inverted_timeframe() {
        let mut input = JobInput::chat("metrics");
        input.from = NaiveDate::from_ymd_opt(2025, 3, 1);
        input.to = NaiveDate::from_ymd_opt(2025, 1, 1);
        assert!(input.validate().is_err());
    }
}
