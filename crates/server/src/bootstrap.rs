use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use reclaim_core::breaker::BreakerConfig;
use reclaim_core::config::{AppConfig, ConfigError, LoadOptions};
use reclaim_core::jobs::{JobLifecycle, JobLifecycleConfig};
use reclaim_db::repositories::{
    SqlAuditLog, SqlBreakerStore, SqlJobRepository, SqlLeaseRepository, SqlRemediationRepository,
    SqlTenantSettingsRepository,
};
use reclaim_db::{connect_with_settings, migrations, DbPool, PoolSettings};
use reclaim_engine::{
    AutopilotConfig, BreakerService, EngineDeps, ExecuteRequestHandler, GuardrailService,
    InMemoryAnalysisSource, InMemoryCostSource, InMemoryResourceOwnership, JobRunner, LogNotifier,
    RemediationEngine, SavingsAutopilot, Scheduler, SchedulerSettings, UnconfiguredExecutor,
    WorkflowConfig,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<RemediationEngine>,
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        PoolSettings {
            max_connections: config.database.max_connections,
            acquire_timeout_secs: config.database.timeout_secs,
        },
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let requests = Arc::new(SqlRemediationRepository::new(db_pool.clone()));
    let leases = Arc::new(SqlLeaseRepository::new(db_pool.clone()));
    let jobs = Arc::new(SqlJobRepository::new(db_pool.clone()));
    let tenants = Arc::new(SqlTenantSettingsRepository::new(db_pool.clone()));
    let audit = Arc::new(SqlAuditLog::new(db_pool.clone()));
    let breaker_store = Arc::new(SqlBreakerStore::new(db_pool.clone()));
    let notifier = Arc::new(LogNotifier);

    let breaker = Arc::new(BreakerService::new(
        breaker_store.clone(),
        BreakerConfig {
            failure_threshold: config.safety.breaker_failure_threshold,
            recovery_timeout_secs: config.safety.breaker_recovery_secs,
            success_threshold: config.safety.breaker_success_threshold,
        },
    ));

    // Cost aggregation, resource discovery, and AI analysis are external
    // subsystems; until their adapters are wired in, the engine runs with
    // inert stand-ins and the executor refuses destructive calls.
    let costs = Arc::new(InMemoryCostSource::default());
    let ownership = Arc::new(InMemoryResourceOwnership::allow_all());
    let analysis = Arc::new(InMemoryAnalysisSource::default());
    let executor = Arc::new(UnconfiguredExecutor);
    info!(
        event_name = "system.bootstrap.collaborator_mode",
        correlation_id = "bootstrap",
        executor = "unconfigured",
        cost_source = "inert",
        analysis_source = "inert",
        "external collaborators running in stand-in mode"
    );

    let guardrails = Arc::new(GuardrailService::new(
        requests.clone(),
        tenants.clone(),
        costs,
        breaker,
        notifier.clone(),
        config.safety.daily_savings_ceiling,
        config.safety.default_monthly_cap,
    ));

    let lifecycle = JobLifecycle::new(JobLifecycleConfig {
        default_max_retries: config.jobs.max_retries,
    });

    let engine = Arc::new(RemediationEngine::new(
        EngineDeps {
            requests,
            leases,
            jobs: jobs.clone(),
            audit,
            guardrails,
            executor,
            ownership,
            notifier: notifier.clone(),
        },
        lifecycle,
        WorkflowConfig {
            grace_period_hours: config.safety.grace_period_hours,
            ..WorkflowConfig::default()
        },
    ));

    let mut runner = JobRunner::new(jobs, notifier, lifecycle);
    runner.register(Arc::new(
        ExecuteRequestHandler::new(engine.clone())
            .with_timeout(Duration::from_secs(config.jobs.default_timeout_secs)),
    ));

    let autopilot = Arc::new(SavingsAutopilot::new(
        engine.clone(),
        analysis,
        AutopilotConfig { min_confidence: config.scheduler.autopilot_min_confidence },
    ));

    let scheduler = Arc::new(Scheduler::new(
        tenants,
        autopilot,
        Arc::new(runner),
        breaker_store,
        SchedulerSettings {
            sweep_interval: Duration::from_secs(config.scheduler.sweep_interval_secs),
            max_concurrent_tenants: config.scheduler.max_concurrent_tenants,
            job_batch_limit: 50,
            stale_after: Duration::from_secs(config.jobs.stale_after_secs),
            autopilot_enabled: config.scheduler.autopilot_enabled,
        },
    ));

    Ok(Application { config, db_pool, engine, scheduler })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use reclaim_core::config::{ConfigOverrides, LoadOptions};
    use reclaim_core::domain::remediation::{CloudProvider, RemediationStatus, ResourceId};
    use reclaim_core::domain::tenant::TenantId;
    use reclaim_engine::{CreateRequestInput, ExecuteOutcome};

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(options("postgres://nope")).await;
        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_schema_and_the_execute_path() {
        let app = bootstrap(options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed against in-memory sqlite");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('remediation_request', 'background_job', 'breaker_kv', 'audit_event')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected foundation tables after bootstrap");
        assert_eq!(table_count, 4, "bootstrap should expose the baseline tables");

        // Drive a request through the wired engine. The executor is the
        // unconfigured stand-in, so execution lands in Failed with its
        // provider code while every state transition still persists.
        let request = app
            .engine
            .create_request(CreateRequestInput {
                tenant_id: TenantId("tenant-smoke".to_string()),
                resource_id: ResourceId("i-smoke-1".to_string()),
                resource_type: "ec2_instance".to_string(),
                provider: CloudProvider::Aws,
                region: "us-east-1".to_string(),
                action: "stop_instance".to_string(),
                estimated_monthly_savings: Decimal::new(4500, 2),
                confidence_score: 0.9,
                create_backup: false,
                backup_retention_days: 7,
                requested_by: "smoke-test".to_string(),
            })
            .await
            .expect("create_request");

        app.engine.approve(&request.id, "smoke-reviewer", None).await.expect("approve");

        let outcome = app.engine.execute(&request.id, true).await.expect("execute");
        let ExecuteOutcome::Failed(failed) = outcome else {
            panic!("unconfigured executor should fail the destructive call");
        };
        assert_eq!(failed.status, RemediationStatus::Failed);
        assert!(failed
            .execution_error
            .as_deref()
            .unwrap_or_default()
            .contains("PROVIDER_NOT_CONFIGURED"));

        let (audit_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM audit_event WHERE request_id = ?")
                .bind(&request.id.0)
                .fetch_one(&app.db_pool)
                .await
                .expect("count audit rows");
        assert!(audit_count >= 3, "requested, approved, started, failed entries expected");

        app.db_pool.close().await;
    }
}
