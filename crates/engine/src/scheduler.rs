//! Periodic orchestration: job dispatch, retry and crash reconciliation,
//! and the bounded-concurrency tenant sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use reclaim_db::repositories::{BreakerStore, TenantSettingsRepository};

use crate::autopilot::SavingsAutopilot;
use crate::jobs::{JobBatchSummary, JobRunner};

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub sweep_interval: Duration,
    /// Semaphore permits for the per-tenant fan-out.
    pub max_concurrent_tenants: usize,
    pub job_batch_limit: u32,
    /// Running jobs older than this lost their worker.
    pub stale_after: Duration,
    pub autopilot_enabled: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(900),
            max_concurrent_tenants: 8,
            job_batch_limit: 50,
            stale_after: Duration::from_secs(900),
            autopilot_enabled: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due_jobs: JobBatchSummary,
    pub retried_jobs: JobBatchSummary,
    pub stale_recovered: u32,
    pub breaker_keys_purged: u64,
    pub tenants_swept: u32,
    pub tenants_failed: u32,
}

pub struct Scheduler {
    tenants: Arc<dyn TenantSettingsRepository>,
    autopilot: Arc<SavingsAutopilot>,
    runner: Arc<JobRunner>,
    breaker_store: Arc<dyn BreakerStore>,
    semaphore: Arc<Semaphore>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        tenants: Arc<dyn TenantSettingsRepository>,
        autopilot: Arc<SavingsAutopilot>,
        runner: Arc<JobRunner>,
        breaker_store: Arc<dyn BreakerStore>,
        settings: SchedulerSettings,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_tenants.max(1)));
        Self { tenants, autopilot, runner, breaker_store, semaphore, settings }
    }

    /// One orchestration pass: deferred jobs (grace completions) first,
    /// then the retry loop, crash reconciliation, store hygiene, and
    /// finally the autopilot fan-out.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.runner.run_due(self.settings.job_batch_limit).await {
            Ok(summary) => report.due_jobs = summary,
            Err(error) => warn!(
                event_name = "scheduler.run_due_failed",
                error = %error,
                "failed to list due jobs"
            ),
        }

        match self.runner.run_retryable(self.settings.job_batch_limit).await {
            Ok(summary) => report.retried_jobs = summary,
            Err(error) => warn!(
                event_name = "scheduler.run_retryable_failed",
                error = %error,
                "failed to list retryable jobs"
            ),
        }

        match self.runner.recover_stale(self.settings.stale_after).await {
            Ok(recovered) => report.stale_recovered = recovered,
            Err(error) => warn!(
                event_name = "scheduler.recover_stale_failed",
                error = %error,
                "stale job reconciliation failed"
            ),
        }

        match self.breaker_store.purge_expired(Utc::now()).await {
            Ok(purged) => report.breaker_keys_purged = purged,
            Err(error) => warn!(
                event_name = "scheduler.breaker_purge_failed",
                error = %error,
                "breaker key purge failed"
            ),
        }

        if self.settings.autopilot_enabled {
            let (swept, failed) = self.sweep_tenants().await;
            report.tenants_swept = swept;
            report.tenants_failed = failed;
        }

        info!(
            event_name = "scheduler.tick",
            due_run = report.due_jobs.run,
            due_completed = report.due_jobs.completed,
            retried = report.retried_jobs.run,
            stale_recovered = report.stale_recovered,
            tenants_swept = report.tenants_swept,
            tenants_failed = report.tenants_failed,
            "scheduler tick finished"
        );

        report
    }

    /// Fan the autopilot out over opted-in tenants, bounded by the
    /// semaphore. Each task holds only cloned `Arc` handles and acquires
    /// pooled connections per query, so no mutable state crosses tasks;
    /// one tenant's failure never aborts the sweep.
    async fn sweep_tenants(&self) -> (u32, u32) {
        let tenants = match self.tenants.list().await {
            Ok(tenants) => tenants,
            Err(error) => {
                warn!(
                    event_name = "scheduler.tenant_list_failed",
                    error = %error,
                    "could not list tenants for sweep"
                );
                return (0, 1);
            }
        };

        let mut join_set = JoinSet::new();
        for settings in tenants {
            if !settings.autopilot_enabled {
                continue;
            }

            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let autopilot = Arc::clone(&self.autopilot);
            let tenant_id = settings.tenant_id.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let result = autopilot.run_for_tenant(&tenant_id).await;
                (tenant_id, result)
            });
        }

        let mut swept = 0;
        let mut failed = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((tenant_id, Ok(summary))) => {
                    swept += 1;
                    info!(
                        event_name = "scheduler.tenant_swept",
                        tenant_id = %tenant_id,
                        considered = summary.considered,
                        completed = summary.completed,
                        failed = summary.failed,
                        skipped_unmapped = summary.skipped_unmapped,
                        halted = summary.halted.as_deref().unwrap_or(""),
                        "tenant sweep finished"
                    );
                }
                Ok((tenant_id, Err(error))) => {
                    failed += 1;
                    warn!(
                        event_name = "scheduler.tenant_sweep_failed",
                        tenant_id = %tenant_id,
                        error = %error,
                        "tenant sweep failed"
                    );
                }
                Err(join_error) => {
                    failed += 1;
                    error!(
                        event_name = "scheduler.tenant_task_crashed",
                        error = %join_error,
                        "tenant sweep task crashed"
                    );
                }
            }
        }

        (swept, failed)
    }

    /// Run ticks on the configured interval until `shutdown` flips.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(
                            event_name = "scheduler.stopping",
                            "scheduler loop stopping"
                        );
                        break;
                    }
                }
            }
        }
    }
}
