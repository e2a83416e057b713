use reclaim_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ConfigSummary {
    database_url: String,
    daily_savings_ceiling: String,
    default_monthly_cap: String,
    grace_period_hours: u64,
    breaker_failure_threshold: u32,
    breaker_recovery_secs: u64,
    breaker_success_threshold: u32,
    sweep_interval_secs: u64,
    max_concurrent_tenants: usize,
    autopilot_enabled: bool,
    autopilot_min_confidence: f64,
    job_max_retries: u32,
    job_default_timeout_secs: u64,
    log_level: String,
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let summary = ConfigSummary {
                database_url: config.database.url,
                daily_savings_ceiling: config.safety.daily_savings_ceiling.to_string(),
                default_monthly_cap: config.safety.default_monthly_cap.to_string(),
                grace_period_hours: config.safety.grace_period_hours,
                breaker_failure_threshold: config.safety.breaker_failure_threshold,
                breaker_recovery_secs: config.safety.breaker_recovery_secs,
                breaker_success_threshold: config.safety.breaker_success_threshold,
                sweep_interval_secs: config.scheduler.sweep_interval_secs,
                max_concurrent_tenants: config.scheduler.max_concurrent_tenants,
                autopilot_enabled: config.scheduler.autopilot_enabled,
                autopilot_min_confidence: config.scheduler.autopilot_min_confidence,
                job_max_retries: config.jobs.max_retries,
                job_default_timeout_secs: config.jobs.default_timeout_secs,
                log_level: config.logging.level,
            };
            serde_json::to_string_pretty(&summary)
                .unwrap_or_else(|error| format!("config serialization failed: {error}"))
        }
        Err(error) => format!("configuration error: {error}"),
    }
}
