//! Safety guardrail service: three independent veto-capable checks run
//! before every execution attempt.
//!
//! Aggregate reads are optimistic; under heavy concurrency the daily
//! ceiling can be exceeded slightly, which is an accepted approximation.
//! The request execution lease is the only lock in play.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use reclaim_core::domain::tenant::{TenantId, TenantSettings};
use reclaim_core::guardrails::{GuardrailVeto, KillSwitchPolicy, MonthlyCapPolicy};
use reclaim_db::repositories::{
    RemediationRepository, RepositoryError, TenantSettingsRepository,
};

use crate::breaker::BreakerService;
use crate::notify::{Notification, Notifier};

#[derive(Debug, Error)]
pub enum CostSourceError {
    #[error("cost source failure: {0}")]
    Unavailable(String),
}

/// Current-month spend per tenant. Cost aggregation itself is an external
/// collaborator; the guardrail only reads the number.
#[async_trait]
pub trait CostSource: Send + Sync {
    async fn current_month_spend(&self, tenant_id: &TenantId) -> Result<Decimal, CostSourceError>;
}

#[derive(Default)]
pub struct InMemoryCostSource {
    spend: tokio::sync::RwLock<std::collections::HashMap<String, Decimal>>,
}

impl InMemoryCostSource {
    pub async fn set_spend(&self, tenant_id: &TenantId, spend: Decimal) {
        self.spend.write().await.insert(tenant_id.0.clone(), spend);
    }
}

#[async_trait]
impl CostSource for InMemoryCostSource {
    async fn current_month_spend(&self, tenant_id: &TenantId) -> Result<Decimal, CostSourceError> {
        Ok(self.spend.read().await.get(&tenant_id.0).copied().unwrap_or(Decimal::ZERO))
    }
}

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error(transparent)]
    Veto(#[from] GuardrailVeto),
    #[error("guardrail state unavailable: {0}")]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Cost(#[from] CostSourceError),
}

pub struct GuardrailService {
    requests: Arc<dyn RemediationRepository>,
    tenants: Arc<dyn TenantSettingsRepository>,
    costs: Arc<dyn CostSource>,
    breaker: Arc<BreakerService>,
    notifier: Arc<dyn Notifier>,
    kill_switch: KillSwitchPolicy,
    default_monthly_cap: Decimal,
}

impl GuardrailService {
    pub fn new(
        requests: Arc<dyn RemediationRepository>,
        tenants: Arc<dyn TenantSettingsRepository>,
        costs: Arc<dyn CostSource>,
        breaker: Arc<BreakerService>,
        notifier: Arc<dyn Notifier>,
        daily_savings_ceiling: Decimal,
        default_monthly_cap: Decimal,
    ) -> Self {
        Self {
            requests,
            tenants,
            costs,
            breaker,
            notifier,
            kill_switch: KillSwitchPolicy { daily_ceiling: daily_savings_ceiling },
            default_monthly_cap,
        }
    }

    /// Run every guardrail. The first veto aborts the call; no check ever
    /// mutates the request.
    pub async fn check_all(
        &self,
        tenant_id: &TenantId,
        request_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), GuardrailError> {
        self.check_kill_switch(request_amount, now).await?;
        self.check_monthly_cap(tenant_id, now).await?;
        self.breaker.check(tenant_id, now).await??;
        Ok(())
    }

    pub async fn record_success(
        &self,
        tenant_id: &TenantId,
        savings: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), GuardrailError> {
        self.breaker.record_success(tenant_id, savings, now).await?;
        Ok(())
    }

    pub async fn record_failure(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<(), GuardrailError> {
        self.breaker.record_failure(tenant_id, now).await?;
        Ok(())
    }

    async fn check_kill_switch(
        &self,
        request_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), GuardrailError> {
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let completed_today = self.requests.sum_completed_savings_since(day_start).await?;
        self.kill_switch.evaluate(completed_today, request_amount)?;
        Ok(())
    }

    async fn check_monthly_cap(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<(), GuardrailError> {
        let settings = self
            .tenants
            .find(tenant_id)
            .await?
            .unwrap_or_else(|| TenantSettings::new(tenant_id.clone(), now));
        let cap = settings.monthly_budget_cap.unwrap_or(self.default_monthly_cap);
        let spend = self.costs.current_month_spend(tenant_id).await?;

        if let Err(veto) = MonthlyCapPolicy.evaluate(tenant_id, spend, cap) {
            self.send_budget_alert_once(settings, spend, cap, now).await;
            return Err(veto.into());
        }

        Ok(())
    }

    /// Dispatch the budget alert at most once per calendar month. Dispatch
    /// failures are logged and retried on the next veto rather than masking
    /// the veto itself.
    async fn send_budget_alert_once(
        &self,
        mut settings: TenantSettings,
        spend: Decimal,
        cap: Decimal,
        now: DateTime<Utc>,
    ) {
        if settings.budget_alert_sent_this_month(now) {
            return;
        }

        let alert = Notification::BudgetAlert {
            tenant_id: settings.tenant_id.clone(),
            spend,
            cap,
        };
        if let Err(error) = self.notifier.dispatch(alert).await {
            warn!(
                event_name = "guardrail.budget_alert_dispatch_failed",
                tenant_id = %settings.tenant_id,
                error = %error,
                "budget alert dispatch failed; will retry on next veto"
            );
            return;
        }

        settings.budget_alert_sent_at = Some(now);
        settings.updated_at = now;
        if let Err(error) = self.tenants.save(settings.clone()).await {
            warn!(
                event_name = "guardrail.budget_alert_bookkeeping_failed",
                tenant_id = %settings.tenant_id,
                error = %error,
                "failed to persist budget alert timestamp"
            );
        }
    }
}
