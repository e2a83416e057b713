use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use super::{BreakerStore, RepositoryError};
use crate::DbPool;

/// Key-value storage for circuit-breaker counters.
///
/// TTL'd rows carry an `expires_at`; reads filter them out so a row whose
/// purge has not run yet still behaves as absent.
pub struct SqlBreakerStore {
    pool: DbPool,
}

impl SqlBreakerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BreakerStore for SqlBreakerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT value FROM breaker_kv
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let expires_at = ttl_secs.map(|secs| now + Duration::seconds(secs as i64));

        sqlx::query(
            "INSERT INTO breaker_kv (key, value, expires_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at.map(|value| value.to_rfc3339()))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM breaker_kv WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM breaker_kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
