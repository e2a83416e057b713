use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use reclaim_core::domain::job::{BackgroundJob, JobId, JobStatus};
use reclaim_core::domain::tenant::TenantId;

use super::remediation::{parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{JobRepository, RepositoryError};
use crate::DbPool;

const JOB_COLUMNS: &str = "id,
    tenant_id,
    job_type,
    status,
    payload_json,
    payload_hash,
    attempts,
    max_retries,
    scheduled_for,
    started_at,
    completed_at,
    result_json,
    error_message,
    created_at,
    updated_at";

pub struct SqlJobRepository {
    pool: DbPool,
}

impl SqlJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobRepository for SqlJobRepository {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<BackgroundJob>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM background_job WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(job_from_row).transpose()
    }

    async fn save(&self, job: BackgroundJob) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO background_job (
                id,
                tenant_id,
                job_type,
                status,
                payload_json,
                payload_hash,
                attempts,
                max_retries,
                scheduled_for,
                started_at,
                completed_at,
                result_json,
                error_message,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempts = excluded.attempts,
                scheduled_for = excluded.scheduled_for,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                result_json = excluded.result_json,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at",
        )
        .bind(&job.id.0)
        .bind(&job.tenant_id.0)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(&job.payload_json)
        .bind(&job.payload_hash)
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_retries))
        .bind(job.scheduled_for.map(|value| value.to_rfc3339()))
        .bind(job.started_at.map(|value| value.to_rfc3339()))
        .bind(job.completed_at.map(|value| value.to_rfc3339()))
        .bind(job.result_json.as_deref())
        .bind(job.error_message.as_deref())
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM background_job
             WHERE status = ? AND (scheduled_for IS NULL OR scheduled_for <= ?)
             ORDER BY scheduled_for ASC, created_at ASC
             LIMIT ?"
        ))
        .bind(JobStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn list_retryable(&self, limit: u32) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM background_job
             WHERE status = ?
             ORDER BY updated_at ASC
             LIMIT ?"
        ))
        .bind(JobStatus::Failed.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn list_stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BackgroundJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM background_job
             WHERE status = ? AND started_at IS NOT NULL AND started_at < ?
             ORDER BY started_at ASC"
        ))
        .bind(JobStatus::Running.as_str())
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM background_job WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}

fn job_from_row(row: SqliteRow) -> Result<BackgroundJob, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown job status `{status_raw}`")))?;

    Ok(BackgroundJob {
        id: JobId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        job_type: row.try_get("job_type")?,
        status,
        payload_json: row.try_get("payload_json")?,
        payload_hash: row.try_get("payload_hash")?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_retries: parse_u32("max_retries", row.try_get("max_retries")?)?,
        scheduled_for: parse_optional_timestamp("scheduled_for", row.try_get("scheduled_for")?)?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        result_json: row.try_get("result_json")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
