use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, PoolSettings};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "remediation_request",
        "remediation_execution_lease",
        "background_job",
        "breaker_kv",
        "audit_event",
        "tenant_settings",
        "idx_remediation_request_tenant_status",
        "idx_remediation_request_status_executed_at",
        "idx_background_job_status_scheduled_for",
        "idx_background_job_tenant",
        "idx_audit_event_request_id",
        "idx_audit_event_tenant_occurred_at",
    ];

    fn single_connection() -> PoolSettings {
        // In-memory sqlite gives every connection its own database, so the
        // test pool must hold exactly one.
        PoolSettings { max_connections: 1, acquire_timeout_secs: 30 }
    }

    #[tokio::test]
    async fn migrations_create_the_managed_schema() {
        let pool =
            connect_with_settings("sqlite::memory:", single_connection()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("check schema object")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool =
            connect_with_settings("sqlite::memory:", single_connection()).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }
}
