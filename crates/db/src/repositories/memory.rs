use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use reclaim_core::domain::job::{BackgroundJob, JobId, JobStatus};
use reclaim_core::domain::remediation::{RemediationRequest, RemediationStatus, RequestId};
use reclaim_core::domain::tenant::{TenantId, TenantSettings};

use super::{
    BreakerStore, JobRepository, LeaseRepository, RemediationRepository, RepositoryError,
    TenantSettingsRepository,
};

#[derive(Default)]
pub struct InMemoryRemediationRepository {
    requests: RwLock<HashMap<String, RemediationRequest>>,
}

#[async_trait::async_trait]
impl RemediationRepository for InMemoryRemediationRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<RemediationRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, request: RemediationRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<RemediationRequest> = requests
            .values()
            .filter(|request| request.tenant_id == *tenant_id)
            .filter(|request| status.map_or(true, |status| request.status == status))
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(matching)
    }

    async fn sum_completed_savings_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Decimal, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| request.status == RemediationStatus::Completed)
            .filter(|request| request.executed_at.is_some_and(|at| at >= since))
            .map(|request| request.estimated_monthly_savings)
            .sum())
    }
}

#[derive(Default)]
pub struct InMemoryLeaseRepository {
    leases: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

#[async_trait::async_trait]
impl LeaseRepository for InMemoryLeaseRepository {
    async fn acquire(
        &self,
        request_id: &RequestId,
        holder: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut leases = self.leases.write().await;
        let expires_at = now + Duration::seconds(ttl_secs as i64);

        match leases.get(&request_id.0) {
            Some((current_holder, current_expiry))
                if *current_expiry > now && current_holder != holder =>
            {
                Ok(false)
            }
            _ => {
                leases.insert(request_id.0.clone(), (holder.to_string(), expires_at));
                Ok(true)
            }
        }
    }

    async fn release(&self, request_id: &RequestId, holder: &str) -> Result<(), RepositoryError> {
        let mut leases = self.leases.write().await;
        if leases.get(&request_id.0).is_some_and(|(current, _)| current == holder) {
            leases.remove(&request_id.0);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, BackgroundJob>>,
}

impl InMemoryJobRepository {
    pub async fn all(&self) -> Vec<BackgroundJob> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<BackgroundJob> = jobs.values().cloned().collect();
        all.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        all
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<BackgroundJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id.0).cloned())
    }

    async fn save(&self, job: BackgroundJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.0.clone(), job);
        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<BackgroundJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|left, right| {
            left.scheduled_for
                .cmp(&right.scheduled_for)
                .then_with(|| left.created_at.cmp(&right.created_at))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_retryable(&self, limit: u32) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut retryable: Vec<BackgroundJob> =
            jobs.values().filter(|job| job.status == JobStatus::Failed).cloned().collect();
        retryable.sort_by(|left, right| left.updated_at.cmp(&right.updated_at));
        retryable.truncate(limit as usize);
        Ok(retryable)
    }

    async fn list_stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<BackgroundJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.started_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect();
        stale.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        Ok(stale)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|job| job.status == status).count() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryBreakerStore {
    entries: RwLock<HashMap<String, (String, Option<DateTime<Utc>>)>>,
}

#[async_trait::async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| expires_at.map_or(true, |at| at > Utc::now()))
            .map(|(value, _)| value.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        let expires_at = ttl_secs.map(|secs| Utc::now() + Duration::seconds(secs as i64));
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTenantSettingsRepository {
    settings: RwLock<HashMap<String, TenantSettings>>,
}

#[async_trait::async_trait]
impl TenantSettingsRepository for InMemoryTenantSettingsRepository {
    async fn find(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        Ok(settings.get(&tenant_id.0).cloned())
    }

    async fn save(&self, settings: TenantSettings) -> Result<(), RepositoryError> {
        let mut all = self.settings.write().await;
        all.insert(settings.tenant_id.0.clone(), settings);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TenantSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        let mut all: Vec<TenantSettings> = settings.values().cloned().collect();
        all.sort_by(|left, right| left.tenant_id.0.cmp(&right.tenant_id.0));
        Ok(all)
    }
}
