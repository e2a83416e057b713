//! Circuit breaker over the shared key-value store.
//!
//! Counters live under namespaced keys so multiple engine instances share
//! one consistent breaker per tenant:
//!
//! ```text
//! {tenant}:state
//! {tenant}:failure_count
//! {tenant}:success_count
//! {tenant}:last_failure_time
//! {tenant}:daily_savings:{date}   (24h TTL)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use reclaim_core::breaker::{
    BreakerAvailability, BreakerConfig, BreakerPolicy, BreakerSnapshot, BreakerState,
};
use reclaim_core::domain::tenant::TenantId;
use reclaim_core::guardrails::GuardrailVeto;
use reclaim_db::repositories::{BreakerStore, RepositoryError};

const DAILY_TTL_SECS: u64 = 86_400;

pub struct BreakerService {
    store: Arc<dyn BreakerStore>,
    policy: BreakerPolicy,
}

impl BreakerService {
    pub fn new(store: Arc<dyn BreakerStore>, config: BreakerConfig) -> Self {
        Self { store, policy: BreakerPolicy::new(config) }
    }

    /// Veto when the tenant's breaker is open at `now`.
    pub async fn check(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Result<(), GuardrailVeto>, RepositoryError> {
        let snapshot = self.load_snapshot(tenant_id).await?;
        match self.policy.availability(&snapshot, now) {
            BreakerAvailability::Allowed { trial } => {
                if trial {
                    info!(
                        event_name = "breaker.half_open_trial",
                        tenant_id = %tenant_id,
                        "allowing half-open trial execution"
                    );
                }
                Ok(Ok(()))
            }
            BreakerAvailability::Blocked { retry_at } => Ok(Err(GuardrailVeto::BreakerOpen {
                tenant_id: tenant_id.clone(),
                retry_at,
            })),
        }
    }

    pub async fn record_success(
        &self,
        tenant_id: &TenantId,
        savings: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let snapshot = self.load_snapshot(tenant_id).await?;
        let next = self.policy.on_success(&snapshot, now);
        self.save_snapshot(tenant_id, &next).await?;

        let key = daily_savings_key(tenant_id, now);
        let accumulated = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<Decimal>().unwrap_or(Decimal::ZERO) + savings,
            None => savings,
        };
        self.store.put(&key, &accumulated.to_string(), Some(DAILY_TTL_SECS)).await?;

        if snapshot.state == BreakerState::HalfOpen && next.state == BreakerState::Closed {
            info!(
                event_name = "breaker.closed",
                tenant_id = %tenant_id,
                "circuit breaker closed after successful trials"
            );
        }

        Ok(())
    }

    pub async fn record_failure(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let snapshot = self.load_snapshot(tenant_id).await?;
        let next = self.policy.on_failure(&snapshot, now);
        self.save_snapshot(tenant_id, &next).await?;

        if snapshot.state != BreakerState::Open && next.state == BreakerState::Open {
            warn!(
                event_name = "breaker.opened",
                tenant_id = %tenant_id,
                failure_count = next.failure_count,
                "circuit breaker opened; autonomous actions suspended for tenant"
            );
        }

        Ok(())
    }

    /// Savings recorded for the tenant today, from the TTL'd accumulator.
    pub async fn daily_savings(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Decimal, RepositoryError> {
        let raw = self.store.get(&daily_savings_key(tenant_id, now)).await?;
        Ok(raw.and_then(|value| value.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO))
    }

    async fn load_snapshot(&self, tenant_id: &TenantId) -> Result<BreakerSnapshot, RepositoryError> {
        let state = self
            .store
            .get(&key(tenant_id, "state"))
            .await?
            .and_then(|raw| BreakerState::parse(&raw))
            .unwrap_or(BreakerState::Closed);
        let failure_count = self.read_counter(&key(tenant_id, "failure_count")).await?;
        let success_count = self.read_counter(&key(tenant_id, "success_count")).await?;
        let last_failure_at = match self.store.get(&key(tenant_id, "last_failure_time")).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|timestamp| timestamp.with_timezone(&Utc)),
            None => None,
        };

        Ok(BreakerSnapshot { state, failure_count, success_count, last_failure_at })
    }

    async fn save_snapshot(
        &self,
        tenant_id: &TenantId,
        snapshot: &BreakerSnapshot,
    ) -> Result<(), RepositoryError> {
        self.store.put(&key(tenant_id, "state"), snapshot.state.as_str(), None).await?;
        self.store
            .put(
                &key(tenant_id, "failure_count"),
                &snapshot.failure_count.to_string(),
                Some(DAILY_TTL_SECS),
            )
            .await?;
        self.store
            .put(
                &key(tenant_id, "success_count"),
                &snapshot.success_count.to_string(),
                Some(DAILY_TTL_SECS),
            )
            .await?;
        match snapshot.last_failure_at {
            Some(at) => {
                self.store
                    .put(&key(tenant_id, "last_failure_time"), &at.to_rfc3339(), None)
                    .await?
            }
            None => self.store.delete(&key(tenant_id, "last_failure_time")).await?,
        }
        Ok(())
    }

    async fn read_counter(&self, key: &str) -> Result<u32, RepositoryError> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or_default())
    }
}

fn key(tenant_id: &TenantId, suffix: &str) -> String {
    format!("{}:{suffix}", tenant_id.0)
}

fn daily_savings_key(tenant_id: &TenantId, now: DateTime<Utc>) -> String {
    format!("{}:daily_savings:{}", tenant_id.0, now.format("%Y-%m-%d"))
}
