use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use reclaim_core::domain::remediation::{
    CloudProvider, RemediationAction, RemediationRequest, RemediationStatus, RequestId, ResourceId,
};
use reclaim_core::domain::tenant::TenantId;

use super::{RemediationRepository, RepositoryError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id,
    tenant_id,
    resource_id,
    resource_type,
    provider,
    region,
    action,
    status,
    estimated_monthly_savings,
    confidence_score,
    create_backup,
    backup_retention_days,
    backup_cost_estimate,
    backup_resource_id,
    requested_by,
    reviewed_by,
    review_notes,
    scheduled_execution_at,
    executed_at,
    execution_error,
    created_at,
    updated_at";

pub struct SqlRemediationRepository {
    pool: DbPool,
}

impl SqlRemediationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RemediationRepository for SqlRemediationRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<RemediationRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM remediation_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(request_from_row).transpose()
    }

    async fn save(&self, request: RemediationRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO remediation_request (
                id,
                tenant_id,
                resource_id,
                resource_type,
                provider,
                region,
                action,
                status,
                estimated_monthly_savings,
                confidence_score,
                create_backup,
                backup_retention_days,
                backup_cost_estimate,
                backup_resource_id,
                requested_by,
                reviewed_by,
                review_notes,
                scheduled_execution_at,
                executed_at,
                execution_error,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                create_backup = excluded.create_backup,
                backup_retention_days = excluded.backup_retention_days,
                backup_cost_estimate = excluded.backup_cost_estimate,
                backup_resource_id = excluded.backup_resource_id,
                reviewed_by = excluded.reviewed_by,
                review_notes = excluded.review_notes,
                scheduled_execution_at = excluded.scheduled_execution_at,
                executed_at = excluded.executed_at,
                execution_error = excluded.execution_error,
                updated_at = excluded.updated_at",
        )
        .bind(&request.id.0)
        .bind(&request.tenant_id.0)
        .bind(&request.resource_id.0)
        .bind(&request.resource_type)
        .bind(request.provider.as_str())
        .bind(&request.region)
        .bind(request.action.as_str())
        .bind(request.status.as_str())
        .bind(request.estimated_monthly_savings.to_string())
        .bind(request.confidence_score)
        .bind(request.create_backup)
        .bind(i64::from(request.backup_retention_days))
        .bind(request.backup_cost_estimate.map(|value| value.to_string()))
        .bind(request.backup_resource_id.as_deref())
        .bind(&request.requested_by)
        .bind(request.reviewed_by.as_deref())
        .bind(request.review_notes.as_deref())
        .bind(request.scheduled_execution_at.map(|value| value.to_rfc3339()))
        .bind(request.executed_at.map(|value| value.to_rfc3339()))
        .bind(request.execution_error.as_deref())
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationRequest>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM remediation_request
                 WHERE tenant_id = ? AND status = ?
                 ORDER BY created_at ASC"
            ))
            .bind(&tenant_id.0)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM remediation_request
                 WHERE tenant_id = ?
                 ORDER BY created_at ASC"
            ))
            .bind(&tenant_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(request_from_row).collect()
    }

    async fn sum_completed_savings_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Decimal, RepositoryError> {
        // Savings are stored as decimal strings, so the sum happens here
        // rather than in SQL where TEXT arithmetic would go through floats.
        let rows = sqlx::query(
            "SELECT estimated_monthly_savings FROM remediation_request
             WHERE status = ? AND executed_at IS NOT NULL AND executed_at >= ?",
        )
        .bind(RemediationStatus::Completed.as_str())
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for row in rows {
            let raw = row.try_get::<String, _>("estimated_monthly_savings")?;
            total += parse_decimal("estimated_monthly_savings", &raw)?;
        }

        Ok(total)
    }
}

fn request_from_row(row: SqliteRow) -> Result<RemediationRequest, RepositoryError> {
    let provider_raw = row.try_get::<String, _>("provider")?;
    let provider = CloudProvider::parse(&provider_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{provider_raw}`")))?;

    let action_raw = row.try_get::<String, _>("action")?;
    let action = RemediationAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action `{action_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = RemediationStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_raw}`")))?;

    Ok(RemediationRequest {
        id: RequestId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        resource_id: ResourceId(row.try_get("resource_id")?),
        resource_type: row.try_get("resource_type")?,
        provider,
        region: row.try_get("region")?,
        action,
        status,
        estimated_monthly_savings: parse_decimal(
            "estimated_monthly_savings",
            &row.try_get::<String, _>("estimated_monthly_savings")?,
        )?,
        confidence_score: row.try_get("confidence_score")?,
        create_backup: row.try_get("create_backup")?,
        backup_retention_days: parse_u32(
            "backup_retention_days",
            row.try_get("backup_retention_days")?,
        )?,
        backup_cost_estimate: row
            .try_get::<Option<String>, _>("backup_cost_estimate")?
            .map(|raw| parse_decimal("backup_cost_estimate", &raw))
            .transpose()?,
        backup_resource_id: row.try_get("backup_resource_id")?,
        requested_by: row.try_get("requested_by")?,
        reviewed_by: row.try_get("reviewed_by")?,
        review_notes: row.try_get("review_notes")?,
        scheduled_execution_at: parse_optional_timestamp(
            "scheduled_execution_at",
            row.try_get("scheduled_execution_at")?,
        )?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        execution_error: row.try_get("execution_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
