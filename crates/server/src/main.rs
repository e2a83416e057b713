mod bootstrap;
mod health;

use anyhow::Result;
use tokio::sync::watch;

use reclaim_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use reclaim_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = app.scheduler.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run_until(shutdown_rx).await;
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        autopilot_enabled = app.config.scheduler.autopilot_enabled,
        "reclaim-server started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "shutdown signal received"
    );

    let _ = shutdown_tx.send(true);
    let grace = std::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, scheduler_task).await.is_err() {
        tracing::warn!(
            event_name = "system.server.forced_stop",
            correlation_id = "shutdown",
            "scheduler did not stop within the graceful window"
        );
    }

    app.db_pool.close().await;
    Ok(())
}
