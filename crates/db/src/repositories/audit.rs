use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use reclaim_core::audit::{AuditEvent, AuditLog, AuditLogError, AuditOutcome};
use reclaim_core::domain::remediation::RequestId;
use reclaim_core::domain::tenant::TenantId;

use super::remediation::parse_timestamp;
use super::RepositoryError;
use crate::DbPool;

pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All events for one request, oldest first, for outcome reconstruction.
    pub async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                event_id,
                tenant_id,
                request_id,
                correlation_id,
                event_type,
                actor,
                resource_id,
                resource_type,
                outcome,
                metadata_json,
                occurred_at
             FROM audit_event
             WHERE request_id = ?
             ORDER BY occurred_at ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

#[async_trait::async_trait]
impl AuditLog for SqlAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|error| AuditLogError::Storage(error.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_event (
                event_id,
                tenant_id,
                request_id,
                correlation_id,
                event_type,
                actor,
                resource_id,
                resource_type,
                outcome,
                metadata_json,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.tenant_id.0)
        .bind(event.request_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(event.resource_id.as_deref())
        .bind(event.resource_type.as_deref())
        .bind(event.outcome.as_str())
        .bind(&metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| AuditLogError::Storage(error.to_string()))?;

        Ok(())
    }
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = AuditOutcome::parse(&outcome_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit outcome `{outcome_raw}`")))?;

    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid audit metadata: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        request_id: row.try_get::<Option<String>, _>("request_id")?.map(RequestId),
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        actor: row.try_get("actor")?,
        resource_id: row.try_get("resource_id")?,
        resource_type: row.try_get("resource_type")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
