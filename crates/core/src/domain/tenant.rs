use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-tenant remediation settings.
///
/// `budget_alert_sent_at` is the at-most-once bookkeeping for the monthly
/// budget alert: an alert is suppressed while the stored timestamp falls in
/// the current calendar month.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    pub monthly_budget_cap: Option<Decimal>,
    pub budget_alert_sent_at: Option<DateTime<Utc>>,
    pub autopilot_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantSettings {
    pub fn new(tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            monthly_budget_cap: None,
            budget_alert_sent_at: None,
            autopilot_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn budget_alert_sent_this_month(&self, now: DateTime<Utc>) -> bool {
        self.budget_alert_sent_at
            .is_some_and(|sent| sent.year() == now.year() && sent.month() == now.month())
    }
}
