//! Remediation request workflow: create, review, and the guarded execute
//! path that turns an approved request into a cloud action.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use reclaim_core::audit::{AuditEvent, AuditLog, AuditLogError, AuditOutcome};
use reclaim_core::domain::remediation::{
    truncate_error, CloudProvider, RemediationAction, RemediationRequest, RemediationStatus,
    RequestId, ResourceId,
};
use reclaim_core::domain::tenant::TenantId;
use reclaim_core::errors::DomainError;
use reclaim_core::jobs::JobLifecycle;
use reclaim_db::repositories::{
    JobRepository, LeaseRepository, RemediationRepository, RepositoryError,
};

use crate::cloud::CloudActionExecutor;
use crate::guardrails::{GuardrailError, GuardrailService};
use crate::jobs::{JobFailure, JobHandler};
use crate::notify::{Notification, Notifier};

/// Job type for deferred grace-period completion.
pub const EXECUTE_JOB_TYPE: &str = "remediation.execute";

/// Actor recorded for autopilot-driven reviews and executions.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub grace_period_hours: u64,
    /// Lease TTL; long enough to cover a slow provider call, short enough
    /// that a crashed holder does not block the request forever.
    pub lease_ttl_secs: u64,
    pub worker_id: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { grace_period_hours: 24, lease_ttl_secs: 600, worker_id: "remediation-engine".into() }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Guardrail(#[from] GuardrailError),
    #[error("remediation request `{0}` not found")]
    NotFound(RequestId),
    #[error("execution already in progress for request `{0}`")]
    ExecutionInProgress(RequestId),
    #[error("resource inventory lookup failed: {0}")]
    Ownership(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditLogError),
}

/// Resource inventory ownership check; the scanner that maintains the
/// inventory is an external collaborator.
#[async_trait]
pub trait ResourceOwnership: Send + Sync {
    async fn owns(&self, tenant_id: &TenantId, resource_id: &ResourceId)
        -> Result<bool, String>;
}

#[derive(Default)]
pub struct InMemoryResourceOwnership {
    owned: tokio::sync::RwLock<std::collections::HashSet<(String, String)>>,
    allow_all: bool,
}

impl InMemoryResourceOwnership {
    /// Permissive inventory for wiring where upstream discovery already
    /// scoped every resource to its tenant.
    pub fn allow_all() -> Self {
        Self { owned: tokio::sync::RwLock::default(), allow_all: true }
    }

    pub async fn grant(&self, tenant_id: &TenantId, resource_id: &ResourceId) {
        self.owned.write().await.insert((tenant_id.0.clone(), resource_id.0.clone()));
    }
}

#[async_trait]
impl ResourceOwnership for InMemoryResourceOwnership {
    async fn owns(
        &self,
        tenant_id: &TenantId,
        resource_id: &ResourceId,
    ) -> Result<bool, String> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self.owned.read().await.contains(&(tenant_id.0.clone(), resource_id.0.clone())))
    }
}

#[derive(Clone, Debug)]
pub struct CreateRequestInput {
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub provider: CloudProvider,
    pub region: String,
    /// Raw action string; unknown values are rejected before anything is
    /// persisted.
    pub action: String,
    pub estimated_monthly_savings: Decimal,
    pub confidence_score: f64,
    pub create_backup: bool,
    pub backup_retention_days: u32,
    pub requested_by: String,
}

/// Result of one `execute` call. Failed cloud calls land the request in
/// `Failed` and come back here rather than as an error: the request row is
/// the durable record of what happened.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecuteOutcome {
    Scheduled(RemediationRequest),
    NotYetDue(RemediationRequest),
    AlreadyFinal(RemediationRequest),
    Completed(RemediationRequest),
    Failed(RemediationRequest),
}

impl ExecuteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled(_) => "scheduled",
            Self::NotYetDue(_) => "not_yet_due",
            Self::AlreadyFinal(_) => "already_final",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn request(&self) -> &RemediationRequest {
        match self {
            Self::Scheduled(request)
            | Self::NotYetDue(request)
            | Self::AlreadyFinal(request)
            | Self::Completed(request)
            | Self::Failed(request) => request,
        }
    }
}

/// Collaborators the workflow engine runs against. Everything is behind a
/// trait so tests can swap in in-memory doubles.
pub struct EngineDeps {
    pub requests: Arc<dyn RemediationRepository>,
    pub leases: Arc<dyn LeaseRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub audit: Arc<dyn AuditLog>,
    pub guardrails: Arc<GuardrailService>,
    pub executor: Arc<dyn CloudActionExecutor>,
    pub ownership: Arc<dyn ResourceOwnership>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct RemediationEngine {
    requests: Arc<dyn RemediationRepository>,
    leases: Arc<dyn LeaseRepository>,
    jobs: Arc<dyn JobRepository>,
    audit: Arc<dyn AuditLog>,
    guardrails: Arc<GuardrailService>,
    executor: Arc<dyn CloudActionExecutor>,
    ownership: Arc<dyn ResourceOwnership>,
    notifier: Arc<dyn Notifier>,
    lifecycle: JobLifecycle,
    config: WorkflowConfig,
}

impl RemediationEngine {
    pub fn new(deps: EngineDeps, lifecycle: JobLifecycle, config: WorkflowConfig) -> Self {
        Self {
            requests: deps.requests,
            leases: deps.leases,
            jobs: deps.jobs,
            audit: deps.audit,
            guardrails: deps.guardrails,
            executor: deps.executor,
            ownership: deps.ownership,
            notifier: deps.notifier,
            lifecycle,
            config,
        }
    }

    pub async fn create_request(
        &self,
        input: CreateRequestInput,
    ) -> Result<RemediationRequest, WorkflowError> {
        let action = RemediationAction::parse_strict(&input.action)?;

        let owned = self
            .ownership
            .owns(&input.tenant_id, &input.resource_id)
            .await
            .map_err(WorkflowError::Ownership)?;
        if !owned {
            return Err(DomainError::CrossTenantResource {
                tenant_id: input.tenant_id,
                resource_id: input.resource_id.0,
            }
            .into());
        }

        let now = Utc::now();
        let request = RemediationRequest {
            id: RequestId(Uuid::new_v4().to_string()),
            tenant_id: input.tenant_id,
            resource_id: input.resource_id,
            resource_type: input.resource_type,
            provider: input.provider,
            region: input.region,
            action,
            status: RemediationStatus::Pending,
            estimated_monthly_savings: input.estimated_monthly_savings,
            confidence_score: input.confidence_score,
            create_backup: input.create_backup,
            backup_retention_days: input.backup_retention_days,
            backup_cost_estimate: None,
            backup_resource_id: None,
            requested_by: input.requested_by,
            reviewed_by: None,
            review_notes: None,
            scheduled_execution_at: None,
            executed_at: None,
            execution_error: None,
            created_at: now,
            updated_at: now,
        };

        self.requests.save(request.clone()).await?;
        self.audit
            .append(
                self.request_event(&request, "remediation.requested", AuditOutcome::Success)
                    .with_metadata("action", request.action.as_str())
                    .with_metadata("savings", request.estimated_monthly_savings.to_string()),
            )
            .await?;

        Ok(request)
    }

    pub async fn approve(
        &self,
        id: &RequestId,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<RemediationRequest, WorkflowError> {
        self.review(id, RemediationStatus::Approved, reviewer, notes).await
    }

    pub async fn reject(
        &self,
        id: &RequestId,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<RemediationRequest, WorkflowError> {
        self.review(id, RemediationStatus::Rejected, reviewer, notes).await
    }

    async fn review(
        &self,
        id: &RequestId,
        decision: RemediationStatus,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<RemediationRequest, WorkflowError> {
        let now = Utc::now();
        let mut request =
            self.requests.find_by_id(id).await?.ok_or_else(|| WorkflowError::NotFound(id.clone()))?;

        // Only Pending requests can be reviewed; the transition check
        // rejects everything else.
        request.transition(decision, now)?;
        request.reviewed_by = Some(reviewer.to_string());
        request.review_notes = notes;
        self.requests.save(request.clone()).await?;

        let (event_type, outcome) = match decision {
            RemediationStatus::Approved => ("remediation.approved", AuditOutcome::Success),
            _ => ("remediation.rejected", AuditOutcome::Rejected),
        };
        self.audit
            .append(
                AuditEvent::new(
                    request.tenant_id.clone(),
                    Some(request.id.clone()),
                    request.id.0.clone(),
                    event_type,
                    reviewer,
                    outcome,
                )
                .with_resource(request.resource_id.0.clone(), request.resource_type.clone()),
            )
            .await?;

        Ok(request)
    }

    /// The central execution algorithm.
    ///
    /// Holds the request's persisted lease for the whole call so there is
    /// at most one in-flight execution per request across all instances.
    pub async fn execute(
        &self,
        id: &RequestId,
        bypass_grace_period: bool,
    ) -> Result<ExecuteOutcome, WorkflowError> {
        let now = Utc::now();
        let acquired = self
            .leases
            .acquire(id, &self.config.worker_id, self.config.lease_ttl_secs, now)
            .await?;
        if !acquired {
            return Err(WorkflowError::ExecutionInProgress(id.clone()));
        }

        let result = self.execute_locked(id, bypass_grace_period).await;

        if let Err(error) = self.leases.release(id, &self.config.worker_id).await {
            warn!(
                event_name = "remediation.lease_release_failed",
                request_id = %id,
                error = %error,
                "lease release failed; it will expire on its own"
            );
        }

        result
    }

    async fn execute_locked(
        &self,
        id: &RequestId,
        bypass_grace_period: bool,
    ) -> Result<ExecuteOutcome, WorkflowError> {
        let now = Utc::now();
        let mut request =
            self.requests.find_by_id(id).await?.ok_or_else(|| WorkflowError::NotFound(id.clone()))?;

        // Terminal outcomes are idempotent no-ops: re-invoking never
        // touches the cloud executor again.
        if matches!(request.status, RemediationStatus::Completed | RemediationStatus::Failed) {
            return Ok(ExecuteOutcome::AlreadyFinal(request));
        }

        // Every guardrail runs on every attempt; a veto aborts with no
        // state change beyond the guardrails' own side effects.
        self.guardrails
            .check_all(&request.tenant_id, request.estimated_monthly_savings, now)
            .await?;

        if request.status == RemediationStatus::Approved && !bypass_grace_period {
            return self.schedule_after_grace(request, now).await;
        }

        if request.status == RemediationStatus::Scheduled {
            if let Some(at) = request.scheduled_execution_at {
                if now < at {
                    return Ok(ExecuteOutcome::NotYetDue(request));
                }
            }
        }

        // Pending and Rejected requests fall out here as invalid
        // transitions before anything destructive happens.
        request.transition(RemediationStatus::Executing, now)?;
        self.requests.save(request.clone()).await?;
        self.audit
            .append(self.request_event(
                &request,
                "remediation.execution_started",
                AuditOutcome::Success,
            ))
            .await?;

        if request.create_backup {
            match self
                .executor
                .create_backup(&request.resource_id, request.backup_retention_days)
                .await
            {
                Ok(backup_id) => {
                    // Persist the backup id before the destructive call so
                    // a crash in between never loses it.
                    request.backup_resource_id = Some(backup_id);
                    self.requests.save(request.clone()).await?;
                }
                Err(error) => {
                    // The destructive action is never attempted without its
                    // backup.
                    let message = format!("BACKUP_FAILED: {error}");
                    return self.finish_failed(request, message).await;
                }
            }
        }

        match self.executor.execute_action(&request.resource_id, request.action).await {
            Ok(()) => self.finish_completed(request).await,
            Err(error) => {
                let message = format!("{error}");
                self.finish_failed(request, message).await
            }
        }
    }

    async fn schedule_after_grace(
        &self,
        mut request: RemediationRequest,
        now: DateTime<Utc>,
    ) -> Result<ExecuteOutcome, WorkflowError> {
        let scheduled_at = now + Duration::hours(self.config.grace_period_hours as i64);
        request.transition(RemediationStatus::Scheduled, now)?;
        request.scheduled_execution_at = Some(scheduled_at);
        self.requests.save(request.clone()).await?;

        self.audit
            .append(
                self.request_event(&request, "remediation.scheduled", AuditOutcome::Success)
                    .with_metadata("scheduled_execution_at", scheduled_at.to_rfc3339()),
            )
            .await?;

        let payload =
            serde_json::json!({ "request_id": request.id.0 }).to_string();
        let job = self.lifecycle.create(
            request.tenant_id.clone(),
            EXECUTE_JOB_TYPE,
            payload,
            Some(scheduled_at),
            now,
        );
        self.jobs.save(job).await?;

        info!(
            event_name = "remediation.scheduled",
            tenant_id = %request.tenant_id,
            request_id = %request.id,
            scheduled_execution_at = %scheduled_at.to_rfc3339(),
            "execution deferred for the grace period"
        );

        Ok(ExecuteOutcome::Scheduled(request))
    }

    async fn finish_completed(
        &self,
        mut request: RemediationRequest,
    ) -> Result<ExecuteOutcome, WorkflowError> {
        let now = Utc::now();
        request.transition(RemediationStatus::Completed, now)?;
        request.executed_at = Some(now);
        request.execution_error = None;
        self.requests.save(request.clone()).await?;

        let mut event =
            self.request_event(&request, "remediation.completed", AuditOutcome::Success)
                .with_metadata("savings", request.estimated_monthly_savings.to_string());
        if let Some(backup_id) = &request.backup_resource_id {
            event = event.with_metadata("backup_resource_id", backup_id.clone());
        }
        self.audit.append(event).await?;

        info!(
            event_name = "remediation.completed",
            tenant_id = %request.tenant_id,
            request_id = %request.id,
            action = request.action.as_str(),
            savings = %request.estimated_monthly_savings,
            "remediation executed"
        );

        if let Err(error) = self
            .guardrails
            .record_success(&request.tenant_id, request.estimated_monthly_savings, now)
            .await
        {
            warn!(
                event_name = "remediation.breaker_record_failed",
                request_id = %request.id,
                error = %error,
                "failed to record breaker success"
            );
        }

        let notification = Notification::RemediationCompleted {
            tenant_id: request.tenant_id.clone(),
            request_id: request.id.clone(),
            action: request.action,
            savings: request.estimated_monthly_savings,
        };
        if let Err(error) = self.notifier.dispatch(notification).await {
            warn!(
                event_name = "remediation.notify_failed",
                request_id = %request.id,
                error = %error,
                "completion notification dispatch failed"
            );
        }

        Ok(ExecuteOutcome::Completed(request))
    }

    async fn finish_failed(
        &self,
        mut request: RemediationRequest,
        message: String,
    ) -> Result<ExecuteOutcome, WorkflowError> {
        let now = Utc::now();
        request.transition(RemediationStatus::Failed, now)?;
        request.execution_error = Some(truncate_error(&message));
        self.requests.save(request.clone()).await?;

        self.audit
            .append(
                self.request_event(&request, "remediation.failed", AuditOutcome::Failed)
                    .with_metadata("error", request.execution_error.clone().unwrap_or_default()),
            )
            .await?;

        warn!(
            event_name = "remediation.failed",
            tenant_id = %request.tenant_id,
            request_id = %request.id,
            action = request.action.as_str(),
            error = %message,
            "remediation execution failed"
        );

        if let Err(error) = self.guardrails.record_failure(&request.tenant_id, now).await {
            warn!(
                event_name = "remediation.breaker_record_failed",
                request_id = %request.id,
                error = %error,
                "failed to record breaker failure"
            );
        }

        Ok(ExecuteOutcome::Failed(request))
    }

    fn request_event(
        &self,
        request: &RemediationRequest,
        event_type: &str,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            request.tenant_id.clone(),
            Some(request.id.clone()),
            request.id.0.clone(),
            event_type,
            self.config.worker_id.clone(),
            outcome,
        )
        .with_resource(request.resource_id.0.clone(), request.resource_type.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ExecutePayload {
    request_id: String,
}

/// Grace-period completion: the deferred job enqueued at scheduling time
/// drives the final execution instead of a polling sweep.
pub struct ExecuteRequestHandler {
    engine: Arc<RemediationEngine>,
    timeout: std::time::Duration,
}

impl ExecuteRequestHandler {
    pub fn new(engine: Arc<RemediationEngine>) -> Self {
        Self { engine, timeout: std::time::Duration::from_secs(300) }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl JobHandler for ExecuteRequestHandler {
    fn job_type(&self) -> &'static str {
        EXECUTE_JOB_TYPE
    }

    fn timeout(&self) -> std::time::Duration {
        self.timeout
    }

    async fn run(
        &self,
        job: reclaim_core::domain::job::BackgroundJob,
    ) -> Result<serde_json::Value, JobFailure> {
        let payload: ExecutePayload = serde_json::from_str(&job.payload_json)
            .map_err(|error| JobFailure::Fatal(format!("malformed payload: {error}")))?;
        let request_id = RequestId(payload.request_id);

        match self.engine.execute(&request_id, false).await {
            Ok(ExecuteOutcome::NotYetDue(_)) => {
                Err(JobFailure::Retryable("grace period has not elapsed yet".to_string()))
            }
            Ok(outcome) => Ok(serde_json::json!({
                "request_id": request_id.0,
                "outcome": outcome.as_str(),
                "status": outcome.request().status.as_str(),
            })),
            Err(WorkflowError::ExecutionInProgress(_)) => {
                Err(JobFailure::Retryable("execution lease is held elsewhere".to_string()))
            }
            // Vetoes are fatal to this call but recoverable later.
            Err(WorkflowError::Guardrail(GuardrailError::Veto(veto))) => {
                Err(JobFailure::Retryable(veto.to_string()))
            }
            Err(WorkflowError::Guardrail(error)) => Err(JobFailure::Retryable(error.to_string())),
            Err(WorkflowError::Repository(error)) => Err(JobFailure::Retryable(error.to_string())),
            Err(WorkflowError::Audit(error)) => Err(JobFailure::Retryable(error.to_string())),
            Err(error) => Err(JobFailure::Fatal(error.to_string())),
        }
    }
}
