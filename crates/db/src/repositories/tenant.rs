use sqlx::{sqlite::SqliteRow, Row};

use reclaim_core::domain::tenant::{TenantId, TenantSettings};

use super::remediation::{parse_decimal, parse_optional_timestamp, parse_timestamp};
use super::{RepositoryError, TenantSettingsRepository};
use crate::DbPool;

pub struct SqlTenantSettingsRepository {
    pool: DbPool,
}

impl SqlTenantSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantSettingsRepository for SqlTenantSettingsRepository {
    async fn find(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantSettings>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                tenant_id,
                monthly_budget_cap,
                budget_alert_sent_at,
                autopilot_enabled,
                created_at,
                updated_at
             FROM tenant_settings
             WHERE tenant_id = ?",
        )
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(settings_from_row).transpose()
    }

    async fn save(&self, settings: TenantSettings) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenant_settings (
                tenant_id,
                monthly_budget_cap,
                budget_alert_sent_at,
                autopilot_enabled,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                monthly_budget_cap = excluded.monthly_budget_cap,
                budget_alert_sent_at = excluded.budget_alert_sent_at,
                autopilot_enabled = excluded.autopilot_enabled,
                updated_at = excluded.updated_at",
        )
        .bind(&settings.tenant_id.0)
        .bind(settings.monthly_budget_cap.map(|value| value.to_string()))
        .bind(settings.budget_alert_sent_at.map(|value| value.to_rfc3339()))
        .bind(settings.autopilot_enabled)
        .bind(settings.created_at.to_rfc3339())
        .bind(settings.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<TenantSettings>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                tenant_id,
                monthly_budget_cap,
                budget_alert_sent_at,
                autopilot_enabled,
                created_at,
                updated_at
             FROM tenant_settings
             ORDER BY tenant_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(settings_from_row).collect()
    }
}

fn settings_from_row(row: SqliteRow) -> Result<TenantSettings, RepositoryError> {
    Ok(TenantSettings {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        monthly_budget_cap: row
            .try_get::<Option<String>, _>("monthly_budget_cap")?
            .map(|raw| parse_decimal("monthly_budget_cap", &raw))
            .transpose()?,
        budget_alert_sent_at: parse_optional_timestamp(
            "budget_alert_sent_at",
            row.try_get("budget_alert_sent_at")?,
        )?,
        autopilot_enabled: row.try_get("autopilot_enabled")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
