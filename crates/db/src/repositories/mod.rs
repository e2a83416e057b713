use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use reclaim_core::domain::job::{BackgroundJob, JobId, JobStatus};
use reclaim_core::domain::remediation::{RemediationRequest, RemediationStatus, RequestId};
use reclaim_core::domain::tenant::{TenantId, TenantSettings};

pub mod audit;
pub mod breaker;
pub mod job;
pub mod lease;
pub mod memory;
pub mod remediation;
pub mod tenant;

pub use audit::SqlAuditLog;
pub use breaker::SqlBreakerStore;
pub use job::SqlJobRepository;
pub use lease::SqlLeaseRepository;
pub use memory::{
    InMemoryBreakerStore, InMemoryJobRepository, InMemoryLeaseRepository,
    InMemoryRemediationRepository, InMemoryTenantSettingsRepository,
};
pub use remediation::SqlRemediationRepository;
pub use tenant::SqlTenantSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RemediationRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId)
        -> Result<Option<RemediationRequest>, RepositoryError>;

    async fn save(&self, request: RemediationRequest) -> Result<(), RepositoryError>;

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationRequest>, RepositoryError>;

    /// Sum of `estimated_monthly_savings` across all tenants for requests
    /// completed at or after `since`. Feeds the global kill switch.
    async fn sum_completed_savings_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Decimal, RepositoryError>;
}

/// Persisted execution lease: the at-most-one-execution guarantee for a
/// request. Survives process restarts; expiry makes a crashed holder's
/// lease stealable.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn acquire(
        &self,
        request_id: &RequestId,
        holder: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn release(&self, request_id: &RequestId, holder: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<BackgroundJob>, RepositoryError>;

    async fn save(&self, job: BackgroundJob) -> Result<(), RepositoryError>;

    /// Pending jobs whose `scheduled_for` has elapsed, oldest first.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BackgroundJob>, RepositoryError>;

    /// Failed jobs are re-runnable once their owner re-queues them; this
    /// surfaces them for the retry loop.
    async fn list_retryable(&self, limit: u32) -> Result<Vec<BackgroundJob>, RepositoryError>;

    /// Running jobs whose `started_at` predates `cutoff` — candidates for
    /// the crash-reconciliation sweep.
    async fn list_stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BackgroundJob>, RepositoryError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, RepositoryError>;
}

/// Namespaced key-value store backing circuit-breaker counters.
///
/// Keys follow `{tenant}:state`, `{tenant}:failure_count`,
/// `{tenant}:success_count`, `{tenant}:last_failure_time`, and the TTL'd
/// `{tenant}:daily_savings:{date}`. Shared storage keeps every engine
/// instance consistent over the same counters.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), RepositoryError>;

    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    /// Drop rows whose TTL elapsed. Reads already filter expired keys; this
    /// keeps the table from accumulating dead daily counters.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TenantSettingsRepository: Send + Sync {
    async fn find(&self, tenant_id: &TenantId)
        -> Result<Option<TenantSettings>, RepositoryError>;

    async fn save(&self, settings: TenantSettings) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<TenantSettings>, RepositoryError>;
}
