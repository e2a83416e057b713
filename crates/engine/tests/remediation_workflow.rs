//! End-to-end workflow coverage over in-memory repositories: the grace
//! period, idempotence, backup ordering, guardrail vetoes, and the deferred
//! completion job.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use reclaim_core::audit::{AuditOutcome, InMemoryAuditLog};
use reclaim_core::breaker::BreakerConfig;
use reclaim_core::domain::remediation::{
    CloudProvider, RemediationAction, RemediationStatus, RequestId, ResourceId,
};
use reclaim_core::domain::tenant::TenantId;
use reclaim_core::errors::DomainError;
use reclaim_core::guardrails::GuardrailVeto;
use reclaim_core::jobs::{JobLifecycle, JobLifecycleConfig};
use reclaim_db::repositories::{
    InMemoryBreakerStore, InMemoryJobRepository, InMemoryLeaseRepository,
    InMemoryRemediationRepository, InMemoryTenantSettingsRepository, JobRepository,
    LeaseRepository, RemediationRepository,
};
use reclaim_engine::{
    AutopilotConfig, BreakerService, CloudActionError, CreateRequestInput, EngineDeps,
    ExecuteOutcome, ExecuteRequestHandler, GuardrailError, GuardrailService,
    InMemoryAnalysisSource, InMemoryCostSource, InMemoryNotifier, InMemoryResourceOwnership,
    JobRunner, RecordingExecutor, RemediationEngine, SavingsAutopilot, WorkflowConfig,
    WorkflowError, EXECUTE_JOB_TYPE,
};

struct Harness {
    requests: Arc<InMemoryRemediationRepository>,
    leases: Arc<InMemoryLeaseRepository>,
    jobs: Arc<InMemoryJobRepository>,
    audit: Arc<InMemoryAuditLog>,
    executor: Arc<RecordingExecutor>,
    notifier: Arc<InMemoryNotifier>,
    ownership: Arc<InMemoryResourceOwnership>,
    analysis: Arc<InMemoryAnalysisSource>,
    engine: Arc<RemediationEngine>,
}

fn harness() -> Harness {
    harness_with_ceiling(Decimal::new(50_000, 2))
}

fn harness_with_ceiling(daily_ceiling: Decimal) -> Harness {
    let requests = Arc::new(InMemoryRemediationRepository::default());
    let leases = Arc::new(InMemoryLeaseRepository::default());
    let jobs = Arc::new(InMemoryJobRepository::default());
    let audit = Arc::new(InMemoryAuditLog::default());
    let executor = Arc::new(RecordingExecutor::default());
    let notifier = Arc::new(InMemoryNotifier::default());
    let tenants = Arc::new(InMemoryTenantSettingsRepository::default());
    let ownership = Arc::new(InMemoryResourceOwnership::default());
    let analysis = Arc::new(InMemoryAnalysisSource::default());

    let breaker = Arc::new(BreakerService::new(
        Arc::new(InMemoryBreakerStore::default()),
        BreakerConfig { failure_threshold: 3, recovery_timeout_secs: 1800, success_threshold: 2 },
    ));
    let guardrails = Arc::new(GuardrailService::new(
        requests.clone(),
        tenants,
        Arc::new(InMemoryCostSource::default()),
        breaker,
        notifier.clone(),
        daily_ceiling,
        Decimal::new(1_000_000, 2),
    ));

    let engine = Arc::new(RemediationEngine::new(
        EngineDeps {
            requests: requests.clone(),
            leases: leases.clone(),
            jobs: jobs.clone(),
            audit: audit.clone(),
            guardrails,
            executor: executor.clone(),
            ownership: ownership.clone(),
            notifier: notifier.clone(),
        },
        JobLifecycle::new(JobLifecycleConfig::default()),
        WorkflowConfig::default(),
    ));

    Harness { requests, leases, jobs, audit, executor, notifier, ownership, analysis, engine }
}

fn tenant() -> TenantId {
    TenantId("tenant-a".to_string())
}

fn resource() -> ResourceId {
    ResourceId("i-0abc123".to_string())
}

fn input(savings_cents: i64, create_backup: bool) -> CreateRequestInput {
    CreateRequestInput {
        tenant_id: tenant(),
        resource_id: resource(),
        resource_type: "ec2_instance".to_string(),
        provider: CloudProvider::Aws,
        region: "us-east-1".to_string(),
        action: "stop_instance".to_string(),
        estimated_monthly_savings: Decimal::new(savings_cents, 2),
        confidence_score: 0.9,
        create_backup,
        backup_retention_days: 7,
        requested_by: "user-1".to_string(),
    }
}

async fn create_approved(harness: &Harness, savings_cents: i64, create_backup: bool) -> RequestId {
    harness.ownership.grant(&tenant(), &resource()).await;
    let request = harness.engine.create_request(input(savings_cents, create_backup)).await.unwrap();
    harness.engine.approve(&request.id, "reviewer-1", None).await.unwrap();
    request.id
}

#[tokio::test]
async fn approve_then_execute_schedules_a_day_out_and_is_reinvocation_safe() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;

    let before = Utc::now();
    let outcome = harness.engine.execute(&id, false).await.unwrap();
    let ExecuteOutcome::Scheduled(request) = outcome else {
        panic!("expected Scheduled outcome");
    };

    let scheduled_at = request.scheduled_execution_at.expect("scheduled_execution_at set");
    let expected = before + Duration::hours(24);
    let drift = (scheduled_at - expected).num_seconds().abs();
    assert!(drift <= 5, "scheduled_execution_at should be ~now+24h, drift {drift}s");

    // The deferred completion job exists, keyed to the request.
    let all_jobs = harness.jobs.all().await;
    assert_eq!(all_jobs.len(), 1);
    assert_eq!(all_jobs[0].job_type, EXECUTE_JOB_TYPE);
    assert_eq!(all_jobs[0].scheduled_for, Some(scheduled_at));
    assert!(all_jobs[0].payload_json.contains(&id.0));

    // Re-invoking before the grace period elapses is a no-op.
    let again = harness.engine.execute(&id, false).await.unwrap();
    let ExecuteOutcome::NotYetDue(unchanged) = again else {
        panic!("expected NotYetDue outcome");
    };
    assert_eq!(unchanged.status, RemediationStatus::Scheduled);
    assert_eq!(unchanged.scheduled_execution_at, Some(scheduled_at));
    assert!(harness.executor.executed_actions().is_empty(), "nothing destructive yet");
    assert_eq!(harness.jobs.all().await.len(), 1, "no duplicate job enqueued");
}

#[tokio::test]
async fn bypass_executes_immediately_and_records_success() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;

    let outcome = harness.engine.execute(&id, true).await.unwrap();
    let ExecuteOutcome::Completed(request) = outcome else {
        panic!("expected Completed outcome");
    };

    assert_eq!(request.status, RemediationStatus::Completed);
    assert!(request.executed_at.is_some());
    assert_eq!(
        harness.executor.executed_actions(),
        vec![(resource(), RemediationAction::StopInstance)]
    );

    let event_types: Vec<String> =
        harness.audit.events().into_iter().map(|event| event.event_type).collect();
    assert!(event_types.contains(&"remediation.execution_started".to_string()));
    assert!(event_types.contains(&"remediation.completed".to_string()));

    let completions = harness
        .notifier
        .sent()
        .into_iter()
        .filter(|n| matches!(n, reclaim_engine::Notification::RemediationCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn execute_on_completed_request_never_touches_the_executor_again() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;

    harness.engine.execute(&id, true).await.unwrap();
    assert_eq!(harness.executor.executed_actions().len(), 1);

    let outcome = harness.engine.execute(&id, true).await.unwrap();
    assert!(matches!(outcome, ExecuteOutcome::AlreadyFinal(_)));
    assert_eq!(harness.executor.executed_actions().len(), 1, "no second invocation");
}

#[tokio::test]
async fn failing_backup_aborts_before_the_destructive_action() {
    let harness = harness();
    let id = create_approved(&harness, 4500, true).await;
    harness
        .executor
        .fail_backups_with(CloudActionError::new("SNAPSHOT_QUOTA", "snapshot quota exceeded"));

    let outcome = harness.engine.execute(&id, true).await.unwrap();
    let ExecuteOutcome::Failed(request) = outcome else {
        panic!("expected Failed outcome");
    };

    assert_eq!(request.status, RemediationStatus::Failed);
    let error = request.execution_error.expect("execution_error stored");
    assert!(error.starts_with("BACKUP_FAILED"), "got: {error}");
    assert!(
        harness.executor.executed_actions().is_empty(),
        "execute_action must never run without its backup"
    );

    let failures: Vec<_> = harness
        .audit
        .events()
        .into_iter()
        .filter(|event| event.outcome == AuditOutcome::Failed)
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn successful_backup_id_is_recorded_on_completion() {
    let harness = harness();
    let id = create_approved(&harness, 4500, true).await;

    let outcome = harness.engine.execute(&id, true).await.unwrap();
    let ExecuteOutcome::Completed(request) = outcome else {
        panic!("expected Completed outcome");
    };

    assert_eq!(request.backup_resource_id.as_deref(), Some("backup-i-0abc123"));
    assert_eq!(harness.executor.backups_taken(), vec![(resource(), 7)]);

    let completed_event = harness
        .audit
        .events()
        .into_iter()
        .find(|event| event.event_type == "remediation.completed")
        .expect("completion audit entry");
    assert_eq!(
        completed_event.metadata.get("backup_resource_id").map(String::as_str),
        Some("backup-i-0abc123")
    );
}

#[tokio::test]
async fn cloud_failure_lands_in_failed_with_truncated_error() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;
    let long_message = "x".repeat(2000);
    harness.executor.fail_actions_with(CloudActionError::new("THROTTLED", long_message));

    let outcome = harness.engine.execute(&id, true).await.unwrap();
    let ExecuteOutcome::Failed(request) = outcome else {
        panic!("expected Failed outcome");
    };

    let stored = request.execution_error.expect("error stored");
    assert!(stored.len() <= 500);
    assert!(stored.starts_with("THROTTLED"));
}

#[tokio::test]
async fn kill_switch_vetoes_without_mutating_the_request() {
    // $500 ceiling; a completed $480 request already counts toward today.
    let harness = harness_with_ceiling(Decimal::new(50_000, 2));

    let funded = create_approved(&harness, 48_000, false).await;
    harness.engine.execute(&funded, true).await.unwrap();

    let blocked = create_approved(&harness, 3_000, false).await;
    let error = harness.engine.execute(&blocked, true).await.unwrap_err();
    assert!(matches!(
        error,
        WorkflowError::Guardrail(GuardrailError::Veto(GuardrailVeto::KillSwitchEngaged { .. }))
    ));

    let unchanged = harness.requests.find_by_id(&blocked).await.unwrap().unwrap();
    assert_eq!(unchanged.status, RemediationStatus::Approved, "veto leaves the request alone");

    // A $10 request still fits under the ceiling.
    let allowed = create_approved(&harness, 1_000, false).await;
    let outcome = harness.engine.execute(&allowed, true).await.unwrap();
    assert!(matches!(outcome, ExecuteOutcome::Completed(_)));
}

#[tokio::test]
async fn repeated_failures_open_the_breaker_and_veto_further_executions() {
    let harness = harness();
    harness.executor.fail_actions_with(CloudActionError::new("THROTTLED", "rate exceeded"));
    harness.ownership.grant(&tenant(), &resource()).await;

    // failure_threshold = 3 in the harness breaker config.
    for _ in 0..3 {
        let request = harness.engine.create_request(input(100, false)).await.unwrap();
        harness.engine.approve(&request.id, "reviewer-1", None).await.unwrap();
        let outcome = harness.engine.execute(&request.id, true).await.unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Failed(_)));
    }

    let request = harness.engine.create_request(input(100, false)).await.unwrap();
    harness.engine.approve(&request.id, "reviewer-1", None).await.unwrap();
    let error = harness.engine.execute(&request.id, true).await.unwrap_err();
    assert!(matches!(
        error,
        WorkflowError::Guardrail(GuardrailError::Veto(GuardrailVeto::BreakerOpen { .. }))
    ));
}

#[tokio::test]
async fn held_lease_blocks_concurrent_execution() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;

    // Another worker holds the lease.
    assert!(harness.leases.acquire(&id, "other-worker", 600, Utc::now()).await.unwrap());

    let error = harness.engine.execute(&id, true).await.unwrap_err();
    assert!(matches!(error, WorkflowError::ExecutionInProgress(_)));
    assert!(harness.executor.executed_actions().is_empty());
    assert_eq!(
        harness.requests.find_by_id(&id).await.unwrap().unwrap().status,
        RemediationStatus::Approved
    );
}

#[tokio::test]
async fn review_is_pending_only_and_unknown_actions_are_rejected_pre_mutation() {
    let harness = harness();
    harness.ownership.grant(&tenant(), &resource()).await;

    let mut bad_action = input(4500, false);
    bad_action.action = "defragment_disk".to_string();
    let error = harness.engine.create_request(bad_action).await.unwrap_err();
    assert!(matches!(error, WorkflowError::Domain(DomainError::UnknownAction { .. })));

    let request = harness.engine.create_request(input(4500, false)).await.unwrap();
    harness.engine.approve(&request.id, "reviewer-1", None).await.unwrap();

    let double_review = harness.engine.reject(&request.id, "reviewer-2", None).await.unwrap_err();
    assert!(matches!(double_review, WorkflowError::Domain(DomainError::InvalidTransition { .. })));
}

#[tokio::test]
async fn cross_tenant_resource_is_rejected_before_persisting() {
    let harness = harness();
    // Resource belongs to another tenant; tenant-a never gets ownership.
    harness
        .ownership
        .grant(&TenantId("tenant-b".to_string()), &resource())
        .await;

    let error = harness.engine.create_request(input(4500, false)).await.unwrap_err();
    assert!(matches!(error, WorkflowError::Domain(DomainError::CrossTenantResource { .. })));
    assert!(harness.requests.list_for_tenant(&tenant(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn deferred_job_completes_the_request_once_the_grace_period_elapses() {
    let harness = harness();
    let id = create_approved(&harness, 4500, false).await;

    let outcome = harness.engine.execute(&id, false).await.unwrap();
    assert!(matches!(outcome, ExecuteOutcome::Scheduled(_)));

    // Rewind the clock: pretend 24h have passed by moving both the
    // request's schedule and the job's due time into the past.
    let past = Utc::now() - Duration::minutes(1);
    let mut request = harness.requests.find_by_id(&id).await.unwrap().unwrap();
    request.scheduled_execution_at = Some(past);
    harness.requests.save(request).await.unwrap();

    let mut job = harness.jobs.all().await.remove(0);
    job.scheduled_for = Some(past);
    harness.jobs.save(job).await.unwrap();

    let mut runner = JobRunner::new(
        harness.jobs.clone(),
        harness.notifier.clone(),
        JobLifecycle::new(JobLifecycleConfig::default()),
    );
    runner.register(Arc::new(ExecuteRequestHandler::new(harness.engine.clone())));

    let summary = runner.run_due(10).await.unwrap();
    assert_eq!(summary.run, 1);
    assert_eq!(summary.completed, 1);

    let finished = harness.requests.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(finished.status, RemediationStatus::Completed);
    assert_eq!(harness.executor.executed_actions().len(), 1);
}

#[tokio::test]
async fn autopilot_runs_the_full_pipeline_and_skips_what_it_cannot_map() {
    let harness = harness();
    harness.ownership.grant(&tenant(), &ResourceId("i-good".to_string())).await;

    let ready = |resource: &str, action: &str, savings: &str, confidence: f64| {
        reclaim_core::domain::recommendation::Recommendation {
            resource_id: resource.to_string(),
            resource_type: "ec2_instance".to_string(),
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            action: action.to_string(),
            estimated_savings: savings.to_string(),
            confidence,
            autonomous_ready: true,
        }
    };

    harness
        .analysis
        .set(
            &tenant(),
            vec![
                ready("i-good", "Stop idle instance", "$45.00", 0.95),
                ready("i-vague", "consider rightsizing maybe", "$90.00", 0.95),
                ready("i-unsure", "Stop idle instance", "$10.00", 0.50),
                ready("i-nonsense", "Stop idle instance", "priceless", 0.95),
            ],
        )
        .await;

    let autopilot = SavingsAutopilot::new(
        harness.engine.clone(),
        harness.analysis.clone(),
        AutopilotConfig::default(),
    );

    let summary = autopilot.run_for_tenant(&tenant()).await.unwrap();
    assert_eq!(summary.considered, 4);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped_unmapped, 1);
    assert_eq!(summary.skipped_low_confidence, 1);
    assert_eq!(summary.skipped_unparsable, 1);
    assert!(summary.halted.is_none());

    let executed = harness.executor.executed_actions();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0 .0, "i-good");

    // System actor is recorded as requester and reviewer.
    let requests = harness.requests.list_for_tenant(&tenant(), None).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].requested_by, "SYSTEM");
    assert_eq!(requests[0].reviewed_by.as_deref(), Some("SYSTEM"));
}

#[tokio::test]
async fn autopilot_halts_the_batch_on_a_guardrail_veto() {
    // Ceiling low enough that the first completion trips the kill switch.
    let harness = harness_with_ceiling(Decimal::new(5_000, 2));
    for resource in ["i-1", "i-2", "i-3"] {
        harness.ownership.grant(&tenant(), &ResourceId(resource.to_string())).await;
    }

    let ready = |resource: &str| reclaim_core::domain::recommendation::Recommendation {
        resource_id: resource.to_string(),
        resource_type: "ec2_instance".to_string(),
        provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        action: "Stop idle instance".to_string(),
        estimated_savings: "$40.00".to_string(),
        confidence: 0.95,
        autonomous_ready: true,
    };

    harness.analysis.set(&tenant(), vec![ready("i-1"), ready("i-2"), ready("i-3")]).await;

    let autopilot = SavingsAutopilot::new(
        harness.engine.clone(),
        harness.analysis.clone(),
        AutopilotConfig::default(),
    );

    let summary = autopilot.run_for_tenant(&tenant()).await.unwrap();
    assert_eq!(summary.completed, 1, "first item completes under the ceiling");
    assert!(summary.halted.is_some(), "second item trips the kill switch and halts");
    assert_eq!(harness.executor.executed_actions().len(), 1);
}
