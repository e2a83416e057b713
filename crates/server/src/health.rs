use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use reclaim_core::domain::job::JobStatus;
use reclaim_db::repositories::{JobRepository, SqlJobRepository};
use reclaim_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub job_queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %err,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let job_queue = job_queue_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "reclaim-server runtime initialized".to_string(),
        },
        database,
        job_queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(err) => HealthCheck { status: "unavailable", detail: err.to_string() },
    }
}

async fn job_queue_check(pool: &DbPool) -> HealthCheck {
    let jobs = SqlJobRepository::new(pool.clone());
    match jobs.count_by_status(JobStatus::DeadLetter).await {
        Ok(0) => HealthCheck { status: "ready", detail: "no dead-letter jobs".to_string() },
        Ok(count) => HealthCheck {
            status: "attention",
            detail: format!("{count} dead-letter jobs awaiting triage"),
        },
        Err(err) => HealthCheck { status: "unavailable", detail: err.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use reclaim_db::{connect_with_settings, migrations, PoolSettings};

    use super::{database_check, job_queue_check};

    #[tokio::test]
    async fn checks_report_ready_against_a_migrated_database() {
        let pool = connect_with_settings(
            "sqlite::memory:",
            PoolSettings { max_connections: 1, acquire_timeout_secs: 30 },
        )
        .await
        .expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let database = database_check(&pool).await;
        assert_eq!(database.status, "ready");

        let job_queue = job_queue_check(&pool).await;
        assert_eq!(job_queue.status, "ready");
    }
}
