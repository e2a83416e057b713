//! Deterministic background-job lifecycle.
//!
//! Pure state-machine logic for the job table: every transition is computed
//! here and persisted individually by the runner, so a crash mid-job always
//! leaves a consistent last-known status.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::{BackgroundJob, JobId, JobStatus};
use crate::domain::remediation::truncate_error;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug)]
pub struct JobLifecycleConfig {
    pub default_max_retries: u32,
}

impl Default for JobLifecycleConfig {
    fn default() -> Self {
        Self { default_max_retries: 3 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("invalid job transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: JobStatus, to: JobStatus, reason: String },
}

/// Whether a failed attempt may be retried later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected domain failure; eligible for another attempt.
    Retryable,
    /// Timeouts and unexpected errors; straight to the dead-letter state.
    Fatal,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JobLifecycle {
    config: JobLifecycleConfig,
}

impl JobLifecycle {
    pub fn new(config: JobLifecycleConfig) -> Self {
        Self { config }
    }

    pub fn create(
        &self,
        tenant_id: TenantId,
        job_type: impl Into<String>,
        payload_json: impl Into<String>,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> BackgroundJob {
        let payload_json = payload_json.into();
        BackgroundJob {
            id: JobId(Uuid::new_v4().to_string()),
            tenant_id,
            job_type: job_type.into(),
            status: JobStatus::Pending,
            payload_hash: hash_payload(&payload_json),
            payload_json,
            attempts: 0,
            max_retries: self.config.default_max_retries,
            scheduled_for,
            started_at: None,
            completed_at: None,
            result_json: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending|Failed -> Running. The attempt counter increments here and
    /// only here.
    pub fn start(
        &self,
        mut job: BackgroundJob,
        now: DateTime<Utc>,
    ) -> Result<BackgroundJob, JobStateError> {
        validate(&job, JobStatus::Running)?;

        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(job)
    }

    pub fn complete(
        &self,
        mut job: BackgroundJob,
        result_json: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<BackgroundJob, JobStateError> {
        validate(&job, JobStatus::Completed)?;

        job.status = JobStatus::Completed;
        job.result_json = Some(result_json.into());
        job.error_message = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job)
    }

    /// Record a failed attempt. Retryable failures park the job in Failed
    /// while attempts remain; everything else dead-letters.
    pub fn fail(
        &self,
        mut job: BackgroundJob,
        error: impl Into<String>,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<BackgroundJob, JobStateError> {
        validate(&job, JobStatus::Failed)?;

        let retryable = kind == FailureKind::Retryable && job.attempts < job.max_retries;
        job.status = if retryable { JobStatus::Failed } else { JobStatus::DeadLetter };
        job.error_message = Some(truncate_error(&error.into()));
        job.updated_at = now;
        Ok(job)
    }

    /// Timeout and crash path: terminal immediately, regardless of attempts.
    pub fn dead_letter(
        &self,
        mut job: BackgroundJob,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<BackgroundJob, JobStateError> {
        validate(&job, JobStatus::DeadLetter)?;

        job.status = JobStatus::DeadLetter;
        job.error_message = Some(truncate_error(&error.into()));
        job.updated_at = now;
        Ok(job)
    }
}

fn validate(job: &BackgroundJob, to: JobStatus) -> Result<(), JobStateError> {
    let valid = match (job.status, to) {
        (JobStatus::Pending, JobStatus::Running) => true,
        (JobStatus::Failed, JobStatus::Running) => true,
        (JobStatus::Running, JobStatus::Completed) => true,
        (JobStatus::Running, JobStatus::Failed) => true,
        (JobStatus::Running, JobStatus::DeadLetter) => true,
        // A pending job may be dead-lettered directly when no handler is
        // registered for its type.
        (JobStatus::Pending, JobStatus::DeadLetter) => true,
        (from, to) if from == to => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(JobStateError::InvalidTransition {
            from: job.status,
            to,
            reason: format!("cannot transition from {:?} to {:?}", job.status, to),
        })
    }
}

fn hash_payload(payload: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
