//! Generic background-job envelope: timeout, retry, and dead-letter
//! semantics around any registered handler.
//!
//! Every lifecycle transition is persisted before the next step runs, so a
//! crash mid-job leaves a consistent last-known status for the stale-job
//! reconciliation sweep to pick up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use reclaim_core::domain::job::{BackgroundJob, JobId, JobStatus};
use reclaim_core::domain::remediation::truncate_error;
use reclaim_core::jobs::{FailureKind, JobLifecycle, JobStateError};
use reclaim_db::repositories::{JobRepository, RepositoryError};

use crate::notify::{Notification, Notifier};

/// Handler-reported failure. `Retryable` re-raises so the scheduler's retry
/// loop can pick the job up again; `Fatal` dead-letters immediately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobFailure {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    /// Hard wall-clock limit for one invocation. A handler that owns slow
    /// external calls declares its own budget here.
    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn run(&self, job: BackgroundJob) -> Result<serde_json::Value, JobFailure>;
}

#[derive(Debug, Error)]
pub enum JobRunError {
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error("no handler registered for job type `{0}`")]
    UnknownJobType(String),
    #[error("job `{job_id}` timed out after {timeout_secs}s")]
    Timeout { job_id: JobId, timeout_secs: u64 },
    #[error("job `{job_id}` failed, retry pending: {message}")]
    Retryable { job_id: JobId, message: String },
    #[error("job `{job_id}` dead-lettered: {message}")]
    DeadLettered { job_id: JobId, message: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    JobState(#[from] JobStateError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobBatchSummary {
    pub run: u32,
    pub completed: u32,
    pub failed: u32,
}

pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    notifier: Arc<dyn Notifier>,
    lifecycle: JobLifecycle,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        notifier: Arc<dyn Notifier>,
        lifecycle: JobLifecycle,
    ) -> Self {
        Self { jobs, notifier, lifecycle, handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    /// Run one job through the full envelope.
    pub async fn run_job(&self, id: &JobId) -> Result<BackgroundJob, JobRunError> {
        let job =
            self.jobs.find_by_id(id).await?.ok_or_else(|| JobRunError::NotFound(id.clone()))?;
        let now = Utc::now();

        let Some(handler) = self.handlers.get(job.job_type.as_str()).cloned() else {
            let job_type = job.job_type.clone();
            let dead = self.lifecycle.dead_letter(
                job,
                format!("no handler registered for job type `{job_type}`"),
                now,
            )?;
            self.jobs.save(dead.clone()).await?;
            self.alert_ops(&dead).await;
            return Err(JobRunError::UnknownJobType(job_type));
        };

        // Transition to Running and commit before any work happens.
        let running = self.lifecycle.start(job, now)?;
        self.jobs.save(running.clone()).await?;

        let timeout = handler.timeout();
        let handle = tokio::spawn({
            let handler = Arc::clone(&handler);
            let job = running.clone();
            async move { handler.run(job).await }
        });
        let abort = handle.abort_handle();

        let outcome = tokio::time::timeout(timeout, handle).await;
        let now = Utc::now();

        match outcome {
            // A hung external call must not be blindly retried: cancel the
            // in-flight task and dead-letter.
            Err(_elapsed) => {
                abort.abort();
                let timeout_secs = timeout.as_secs();
                let dead = self.lifecycle.dead_letter(
                    running,
                    format!("timed out after {timeout_secs}s"),
                    now,
                )?;
                self.jobs.save(dead.clone()).await?;
                self.alert_ops(&dead).await;
                Err(JobRunError::Timeout { job_id: dead.id, timeout_secs })
            }
            Ok(Err(join_error)) => {
                let dead = self.lifecycle.dead_letter(
                    running,
                    truncate_error(&format!("handler crashed: {join_error}")),
                    now,
                )?;
                self.jobs.save(dead.clone()).await?;
                self.alert_ops(&dead).await;
                let message = dead.error_message.clone().unwrap_or_default();
                Err(JobRunError::DeadLettered { job_id: dead.id, message })
            }
            Ok(Ok(Ok(result))) => {
                let completed = self.lifecycle.complete(running, result.to_string(), now)?;
                self.jobs.save(completed.clone()).await?;
                info!(
                    event_name = "job.completed",
                    job_id = %completed.id,
                    job_type = %completed.job_type,
                    attempts = completed.attempts,
                    "job completed"
                );
                Ok(completed)
            }
            Ok(Ok(Err(JobFailure::Retryable(message)))) => {
                let failed =
                    self.lifecycle.fail(running, &message, FailureKind::Retryable, now)?;
                self.jobs.save(failed.clone()).await?;

                if failed.status == JobStatus::DeadLetter {
                    self.alert_ops(&failed).await;
                    Err(JobRunError::DeadLettered { job_id: failed.id, message })
                } else {
                    // Re-raise so the caller's retry loop sees the failure.
                    Err(JobRunError::Retryable { job_id: failed.id, message })
                }
            }
            Ok(Ok(Err(JobFailure::Fatal(message)))) => {
                let dead = self.lifecycle.fail(running, &message, FailureKind::Fatal, now)?;
                self.jobs.save(dead.clone()).await?;
                self.alert_ops(&dead).await;
                Err(JobRunError::DeadLettered { job_id: dead.id, message })
            }
        }
    }

    /// Claim and run Pending jobs whose `scheduled_for` has elapsed.
    pub async fn run_due(&self, limit: u32) -> Result<JobBatchSummary, RepositoryError> {
        let due = self.jobs.list_due(Utc::now(), limit).await?;
        Ok(self.run_batch(due).await)
    }

    /// Re-run jobs parked in Failed. Bounded by their own `max_retries`.
    pub async fn run_retryable(&self, limit: u32) -> Result<JobBatchSummary, RepositoryError> {
        let retryable = self.jobs.list_retryable(limit).await?;
        Ok(self.run_batch(retryable).await)
    }

    async fn run_batch(&self, batch: Vec<BackgroundJob>) -> JobBatchSummary {
        let mut summary = JobBatchSummary::default();
        for job in batch {
            summary.run += 1;
            match self.run_job(&job.id).await {
                Ok(_) => summary.completed += 1,
                Err(error) => {
                    summary.failed += 1;
                    warn!(
                        event_name = "job.run_failed",
                        job_id = %job.id,
                        job_type = %job.job_type,
                        error = %error,
                        "job did not complete"
                    );
                }
            }
        }
        summary
    }

    /// Crash reconciliation: Running jobs whose `started_at` is older than
    /// `stale_after` lost their worker. Park them as retryable, or
    /// dead-letter once retries are exhausted.
    pub async fn recover_stale(&self, stale_after: Duration) -> Result<u32, JobRunError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(stale_after.as_secs() as i64);
        let stale = self.jobs.list_stale_running(cutoff).await?;

        let mut recovered = 0;
        for job in stale {
            let job_id = job.id.clone();
            let reclaimed = self.lifecycle.fail(
                job,
                "worker lost: job exceeded the stale cutoff while running",
                FailureKind::Retryable,
                now,
            )?;
            self.jobs.save(reclaimed.clone()).await?;
            recovered += 1;

            warn!(
                event_name = "job.stale_recovered",
                job_id = %job_id,
                status = reclaimed.status.as_str(),
                attempts = reclaimed.attempts,
                "recovered stale running job"
            );

            if reclaimed.status == JobStatus::DeadLetter {
                self.alert_ops(&reclaimed).await;
            }
        }

        Ok(recovered)
    }

    async fn alert_ops(&self, job: &BackgroundJob) {
        let notification = Notification::OpsAlert {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            message: job.error_message.clone().unwrap_or_else(|| "unknown failure".to_string()),
        };
        if let Err(error) = self.notifier.dispatch(notification).await {
            warn!(
                event_name = "job.ops_alert_failed",
                job_id = %job.id,
                error = %error,
                "ops alert dispatch failed"
            );
        }
    }
}
