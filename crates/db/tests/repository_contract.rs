use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use reclaim_core::audit::{AuditEvent, AuditLog, AuditOutcome};
use reclaim_core::domain::job::JobStatus;
use reclaim_core::domain::remediation::{
    CloudProvider, RemediationAction, RemediationRequest, RemediationStatus, RequestId, ResourceId,
};
use reclaim_core::domain::tenant::{TenantId, TenantSettings};
use reclaim_core::jobs::{JobLifecycle, JobLifecycleConfig};
use reclaim_db::repositories::{
    BreakerStore, JobRepository, LeaseRepository, RemediationRepository, SqlAuditLog,
    SqlBreakerStore, SqlJobRepository, SqlLeaseRepository, SqlRemediationRepository,
    SqlTenantSettingsRepository, TenantSettingsRepository,
};
use reclaim_db::{connect_with_settings, migrations, DbPool, PoolSettings};

async fn test_pool() -> DbPool {
    // A single connection keeps every query on the same in-memory database.
    let settings = PoolSettings { max_connections: 1, acquire_timeout_secs: 30 };
    let pool = connect_with_settings("sqlite::memory:", settings)
        .await
        .expect("connect to in-memory sqlite");
    migrations::run_pending(&pool).await.expect("apply migrations");
    pool
}

fn tenant() -> TenantId {
    TenantId("tenant-a".to_string())
}

fn request_fixture(status: RemediationStatus) -> RemediationRequest {
    let now = Utc::now();
    RemediationRequest {
        id: RequestId(Uuid::new_v4().to_string()),
        tenant_id: tenant(),
        resource_id: ResourceId("i-0abc123".to_string()),
        resource_type: "ec2_instance".to_string(),
        provider: CloudProvider::Aws,
        region: "us-east-1".to_string(),
        action: RemediationAction::StopInstance,
        status,
        estimated_monthly_savings: Decimal::new(4500, 2),
        confidence_score: 0.92,
        create_backup: true,
        backup_retention_days: 14,
        backup_cost_estimate: Some(Decimal::new(120, 2)),
        backup_resource_id: None,
        requested_by: "user-1".to_string(),
        reviewed_by: None,
        review_notes: None,
        scheduled_execution_at: None,
        executed_at: None,
        execution_error: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn remediation_request_round_trips_through_sqlite() {
    let pool = test_pool().await;
    let repo = SqlRemediationRepository::new(pool);

    let mut request = request_fixture(RemediationStatus::Pending);
    repo.save(request.clone()).await.expect("insert");

    let loaded = repo.find_by_id(&request.id).await.expect("load").expect("present");
    assert_eq!(loaded, request);

    request.status = RemediationStatus::Approved;
    request.reviewed_by = Some("reviewer-1".to_string());
    request.review_notes = Some("looks idle for 30 days".to_string());
    repo.save(request.clone()).await.expect("upsert");

    let reloaded = repo.find_by_id(&request.id).await.expect("load").expect("present");
    assert_eq!(reloaded.status, RemediationStatus::Approved);
    assert_eq!(reloaded.reviewed_by.as_deref(), Some("reviewer-1"));
}

#[tokio::test]
async fn completed_savings_sum_only_counts_the_window() {
    let pool = test_pool().await;
    let repo = SqlRemediationRepository::new(pool);
    let now = Utc::now();

    let mut today = request_fixture(RemediationStatus::Completed);
    today.estimated_monthly_savings = Decimal::new(30_000, 2);
    today.executed_at = Some(now - Duration::hours(2));
    repo.save(today).await.expect("save today");

    let mut yesterday = request_fixture(RemediationStatus::Completed);
    yesterday.estimated_monthly_savings = Decimal::new(99_900, 2);
    yesterday.executed_at = Some(now - Duration::hours(30));
    repo.save(yesterday).await.expect("save yesterday");

    let mut pending = request_fixture(RemediationStatus::Pending);
    pending.estimated_monthly_savings = Decimal::new(50_000, 2);
    repo.save(pending).await.expect("save pending");

    let since = now - Duration::hours(24);
    let total = repo.sum_completed_savings_since(since).await.expect("sum");
    assert_eq!(total, Decimal::new(30_000, 2));
}

#[tokio::test]
async fn lease_blocks_second_holder_until_expiry() {
    let pool = test_pool().await;
    let leases = SqlLeaseRepository::new(pool);
    let request_id = RequestId("req-lease-1".to_string());
    let now = Utc::now();

    assert!(leases.acquire(&request_id, "worker-a", 60, now).await.expect("first acquire"));
    assert!(
        !leases.acquire(&request_id, "worker-b", 60, now).await.expect("contended acquire"),
        "held lease must not be stolen before expiry"
    );

    // Re-entrant acquire by the same holder refreshes the lease.
    assert!(leases.acquire(&request_id, "worker-a", 60, now).await.expect("re-acquire"));

    // After expiry the lease is stealable.
    let later = now + Duration::seconds(120);
    assert!(leases.acquire(&request_id, "worker-b", 60, later).await.expect("steal expired"));

    leases.release(&request_id, "worker-b").await.expect("release");
    assert!(leases.acquire(&request_id, "worker-c", 60, later).await.expect("post-release"));
}

#[tokio::test]
async fn job_queue_surfaces_due_retryable_and_stale_work() {
    let pool = test_pool().await;
    let repo = SqlJobRepository::new(pool);
    let lifecycle = JobLifecycle::new(JobLifecycleConfig::default());
    let now = Utc::now();

    let due = lifecycle.create(tenant(), "remediation.execute", "{}", None, now);
    let deferred = lifecycle.create(
        tenant(),
        "remediation.execute",
        "{}",
        Some(now + Duration::hours(24)),
        now,
    );
    let running_stale = {
        let job = lifecycle.create(tenant(), "sweep", "{}", None, now - Duration::hours(1));
        lifecycle.start(job, now - Duration::hours(1)).expect("start")
    };

    repo.save(due.clone()).await.expect("save due");
    repo.save(deferred.clone()).await.expect("save deferred");
    repo.save(running_stale.clone()).await.expect("save stale");

    let due_now = repo.list_due(now, 10).await.expect("list due");
    assert_eq!(due_now.len(), 1);
    assert_eq!(due_now[0].id, due.id);

    let due_later = repo.list_due(now + Duration::hours(25), 10).await.expect("list later");
    assert_eq!(due_later.len(), 2, "deferred job becomes due after scheduled_for");

    let stale = repo.list_stale_running(now - Duration::minutes(30)).await.expect("stale");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, running_stale.id);

    let failed = lifecycle
        .fail(
            stale[0].clone(),
            "worker lost",
            reclaim_core::jobs::FailureKind::Retryable,
            now,
        )
        .expect("fail");
    repo.save(failed).await.expect("save failed");

    let retryable = repo.list_retryable(10).await.expect("retryable");
    assert_eq!(retryable.len(), 1);
    assert_eq!(repo.count_by_status(JobStatus::Failed).await.expect("count"), 1);
}

#[tokio::test]
async fn breaker_store_honors_ttl_and_purge() {
    let pool = test_pool().await;
    let store = SqlBreakerStore::new(pool);

    store.put("tenant-a:state", "open", None).await.expect("put state");
    store.put("tenant-a:daily_savings:2026-08-05", "120.50", Some(86_400)).await.expect("put ttl");
    store.put("tenant-a:stale", "x", Some(0)).await.expect("put expired");

    assert_eq!(store.get("tenant-a:state").await.expect("get"), Some("open".to_string()));
    assert_eq!(
        store.get("tenant-a:daily_savings:2026-08-05").await.expect("get ttl"),
        Some("120.50".to_string())
    );
    assert_eq!(store.get("tenant-a:stale").await.expect("get expired"), None);

    let purged = store.purge_expired(Utc::now()).await.expect("purge");
    assert_eq!(purged, 1);

    store.delete("tenant-a:state").await.expect("delete");
    assert_eq!(store.get("tenant-a:state").await.expect("get deleted"), None);
}

#[tokio::test]
async fn tenant_settings_round_trip_and_list() {
    let pool = test_pool().await;
    let repo = SqlTenantSettingsRepository::new(pool);
    let now = Utc::now();

    let mut settings = TenantSettings::new(tenant(), now);
    settings.monthly_budget_cap = Some(Decimal::new(1_000_000, 2));
    settings.autopilot_enabled = true;
    repo.save(settings.clone()).await.expect("save");

    let loaded = repo.find(&tenant()).await.expect("find").expect("present");
    assert_eq!(loaded, settings);

    let other = TenantSettings::new(TenantId("tenant-b".to_string()), now);
    repo.save(other).await.expect("save other");

    let listed = repo.list().await.expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].tenant_id.0, "tenant-a");
}

#[tokio::test]
async fn audit_log_appends_and_reconstructs_by_request() {
    let pool = test_pool().await;
    let log = SqlAuditLog::new(pool);
    let request_id = RequestId("req-audit-1".to_string());

    log.append(
        AuditEvent::new(
            tenant(),
            Some(request_id.clone()),
            "corr-1",
            "remediation.execution_started",
            "scheduler",
            AuditOutcome::Success,
        )
        .with_resource("i-0abc123", "ec2_instance"),
    )
    .await
    .expect("append start");

    log.append(
        AuditEvent::new(
            tenant(),
            Some(request_id.clone()),
            "corr-1",
            "remediation.failed",
            "scheduler",
            AuditOutcome::Failed,
        )
        .with_metadata("error", "BACKUP_FAILED: quota"),
    )
    .await
    .expect("append failure");

    let events = log.list_for_request(&request_id).await.expect("list");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "remediation.execution_started");
    assert_eq!(events[1].outcome, AuditOutcome::Failed);
    assert_eq!(events[1].metadata.get("error").map(String::as_str), Some("BACKUP_FAILED: quota"));
}
