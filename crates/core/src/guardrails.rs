//! Veto-capable safety policies.
//!
//! Each policy is an independent read-then-decide check: aggregates are
//! loaded by the caller (optimistically, no extra locking beyond the
//! request execution lease) and evaluated here. A veto is always a typed
//! error, never a silent skip.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GuardrailVeto {
    #[error(
        "global kill switch engaged: projected daily savings {projected} would reach ceiling {ceiling}"
    )]
    KillSwitchEngaged { projected: Decimal, ceiling: Decimal },
    #[error("tenant `{tenant_id}` monthly spend {spend} exceeds budget cap {cap}")]
    MonthlyCapExceeded { tenant_id: TenantId, spend: Decimal, cap: Decimal },
    #[error("circuit breaker open for tenant `{tenant_id}`{}", retry_hint(.retry_at))]
    BreakerOpen { tenant_id: TenantId, retry_at: Option<DateTime<Utc>> },
}

fn retry_hint(retry_at: &Option<DateTime<Utc>>) -> String {
    match retry_at {
        Some(at) => format!(" (half-open trial at {})", at.to_rfc3339()),
        None => String::new(),
    }
}

/// Global daily ceiling on cumulative autonomous savings impact.
///
/// Bounds total blast radius across all tenants: once today's completed
/// savings plus the candidate request would reach the ceiling, everything
/// further is vetoed until the day rolls over.
#[derive(Clone, Copy, Debug)]
pub struct KillSwitchPolicy {
    pub daily_ceiling: Decimal,
}

impl KillSwitchPolicy {
    pub fn evaluate(
        &self,
        completed_today: Decimal,
        request_amount: Decimal,
    ) -> Result<(), GuardrailVeto> {
        let projected = completed_today + request_amount;
        if projected >= self.daily_ceiling {
            return Err(GuardrailVeto::KillSwitchEngaged {
                projected,
                ceiling: self.daily_ceiling,
            });
        }
        Ok(())
    }
}

/// Per-tenant monthly budget hard cap.
#[derive(Clone, Copy, Debug)]
pub struct MonthlyCapPolicy;

impl MonthlyCapPolicy {
    pub fn evaluate(
        &self,
        tenant_id: &TenantId,
        month_spend: Decimal,
        cap: Decimal,
    ) -> Result<(), GuardrailVeto> {
        if month_spend > cap {
            return Err(GuardrailVeto::MonthlyCapExceeded {
                tenant_id: tenant_id.clone(),
                spend: month_spend,
                cap,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{GuardrailVeto, KillSwitchPolicy, MonthlyCapPolicy};
    use crate::domain::tenant::TenantId;

    fn dollars(value: i64) -> Decimal {
        Decimal::new(value * 100, 2)
    }

    #[test]
    fn kill_switch_vetoes_at_the_ceiling_boundary() {
        let policy = KillSwitchPolicy { daily_ceiling: dollars(500) };

        // $480 completed + $30 candidate reaches the $500 ceiling.
        let veto = policy.evaluate(dollars(480), dollars(30)).unwrap_err();
        assert!(matches!(veto, GuardrailVeto::KillSwitchEngaged { .. }));

        // $480 + $10 stays under it.
        assert!(policy.evaluate(dollars(480), dollars(10)).is_ok());

        // Exactly at the ceiling counts as engaged.
        assert!(policy.evaluate(dollars(490), dollars(10)).is_err());
    }

    #[test]
    fn monthly_cap_blocks_only_once_spend_exceeds_cap() {
        let tenant = TenantId("tenant-a".to_string());

        assert!(MonthlyCapPolicy.evaluate(&tenant, dollars(999), dollars(1000)).is_ok());
        assert!(MonthlyCapPolicy.evaluate(&tenant, dollars(1000), dollars(1000)).is_ok());

        let veto = MonthlyCapPolicy.evaluate(&tenant, dollars(1001), dollars(1000)).unwrap_err();
        assert!(matches!(
            veto,
            GuardrailVeto::MonthlyCapExceeded { ref tenant_id, .. } if tenant_id == &tenant
        ));
    }
}
