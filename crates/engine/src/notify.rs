use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use reclaim_core::domain::job::JobId;
use reclaim_core::domain::remediation::{RemediationAction, RequestId};
use reclaim_core::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    BudgetAlert { tenant_id: TenantId, spend: Decimal, cap: Decimal },
    OpsAlert { job_id: JobId, job_type: String, message: String },
    RemediationCompleted {
        tenant_id: TenantId,
        request_id: RequestId,
        action: RemediationAction,
        savings: Decimal,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Emits notifications as structured log events. The production deployment
/// swaps in a channel-backed notifier; the engine only needs the trait.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::BudgetAlert { tenant_id, spend, cap } => warn!(
                event_name = "notify.budget_alert",
                tenant_id = %tenant_id,
                spend = %spend,
                cap = %cap,
                "tenant exceeded monthly budget cap"
            ),
            Notification::OpsAlert { job_id, job_type, message } => warn!(
                event_name = "notify.ops_alert",
                job_id = %job_id,
                job_type = %job_type,
                message = %message,
                "job requires operator attention"
            ),
            Notification::RemediationCompleted { tenant_id, request_id, action, savings } => info!(
                event_name = "notify.remediation_completed",
                tenant_id = %tenant_id,
                request_id = %request_id,
                action = action.as_str(),
                savings = %savings,
                "remediation completed"
            ),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}
