use chrono::{DateTime, Duration, Utc};

use reclaim_core::domain::remediation::RequestId;

use super::{LeaseRepository, RepositoryError};
use crate::DbPool;

/// Persisted execution lease keyed by request id.
///
/// sqlite offers no `SELECT ... FOR UPDATE`, so at-most-one execution per
/// request rides on a conditional upsert: the insert wins the row, and an
/// update only steals it once the previous holder's lease has expired.
pub struct SqlLeaseRepository {
    pool: DbPool,
}

impl SqlLeaseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeaseRepository for SqlLeaseRepository {
    async fn acquire(
        &self,
        request_id: &RequestId,
        holder: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let expires_at = now + Duration::seconds(ttl_secs as i64);

        let result = sqlx::query(
            "INSERT INTO remediation_execution_lease (request_id, holder, acquired_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(request_id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
             WHERE remediation_execution_lease.expires_at <= excluded.acquired_at
                OR remediation_execution_lease.holder = excluded.holder",
        )
        .bind(&request_id.0)
        .bind(holder)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, request_id: &RequestId, holder: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM remediation_execution_lease WHERE request_id = ? AND holder = ?")
            .bind(&request_id.0)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
