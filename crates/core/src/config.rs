use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub safety: SafetyConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: JobConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SafetyConfig {
    /// Global kill switch: daily ceiling on cumulative completed savings.
    pub daily_savings_ceiling: Decimal,
    /// Fallback monthly budget cap for tenants without an explicit one.
    pub default_monthly_cap: Decimal,
    /// Cooling-off period between approval and execution.
    pub grace_period_hours: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_secs: u64,
    pub breaker_success_threshold: u32,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
    /// Semaphore permits for the per-tenant sweep fan-out.
    pub max_concurrent_tenants: usize,
    pub autopilot_enabled: bool,
    pub autopilot_min_confidence: f64,
}

#[derive(Clone, Debug)]
pub struct JobConfig {
    pub default_timeout_secs: u64,
    pub max_retries: u32,
    /// Running jobs older than this are reconciled by the stale sweep.
    pub stale_after_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub daily_savings_ceiling: Option<Decimal>,
    pub autopilot_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://reclaim.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            safety: SafetyConfig {
                daily_savings_ceiling: Decimal::new(50_000, 2),
                default_monthly_cap: Decimal::new(1_000_000, 2),
                grace_period_hours: 24,
                breaker_failure_threshold: 5,
                breaker_recovery_secs: 1800,
                breaker_success_threshold: 2,
            },
            scheduler: SchedulerConfig {
                sweep_interval_secs: 900,
                max_concurrent_tenants: 8,
                autopilot_enabled: false,
                autopilot_min_confidence: 0.85,
            },
            jobs: JobConfig { default_timeout_secs: 300, max_retries: 3, stale_after_secs: 900 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reclaim.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(safety) = patch.safety {
            if let Some(raw) = safety.daily_savings_ceiling {
                self.safety.daily_savings_ceiling =
                    parse_decimal("safety.daily_savings_ceiling", &raw)?;
            }
            if let Some(raw) = safety.default_monthly_cap {
                self.safety.default_monthly_cap = parse_decimal("safety.default_monthly_cap", &raw)?;
            }
            if let Some(grace_period_hours) = safety.grace_period_hours {
                self.safety.grace_period_hours = grace_period_hours;
            }
            if let Some(threshold) = safety.breaker_failure_threshold {
                self.safety.breaker_failure_threshold = threshold;
            }
            if let Some(recovery) = safety.breaker_recovery_secs {
                self.safety.breaker_recovery_secs = recovery;
            }
            if let Some(threshold) = safety.breaker_success_threshold {
                self.safety.breaker_success_threshold = threshold;
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(interval) = scheduler.sweep_interval_secs {
                self.scheduler.sweep_interval_secs = interval;
            }
            if let Some(max_concurrent) = scheduler.max_concurrent_tenants {
                self.scheduler.max_concurrent_tenants = max_concurrent;
            }
            if let Some(enabled) = scheduler.autopilot_enabled {
                self.scheduler.autopilot_enabled = enabled;
            }
            if let Some(confidence) = scheduler.autopilot_min_confidence {
                self.scheduler.autopilot_min_confidence = confidence;
            }
        }

        if let Some(jobs) = patch.jobs {
            if let Some(timeout) = jobs.default_timeout_secs {
                self.jobs.default_timeout_secs = timeout;
            }
            if let Some(max_retries) = jobs.max_retries {
                self.jobs.max_retries = max_retries;
            }
            if let Some(stale_after) = jobs.stale_after_secs {
                self.jobs.stale_after_secs = stale_after;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.health_check_port {
                self.server.health_check_port = port;
            }
            if let Some(shutdown) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = shutdown;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RECLAIM_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RECLAIM_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RECLAIM_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RECLAIM_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RECLAIM_SAFETY_DAILY_SAVINGS_CEILING") {
            self.safety.daily_savings_ceiling =
                parse_decimal("RECLAIM_SAFETY_DAILY_SAVINGS_CEILING", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SAFETY_DEFAULT_MONTHLY_CAP") {
            self.safety.default_monthly_cap =
                parse_decimal("RECLAIM_SAFETY_DEFAULT_MONTHLY_CAP", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SAFETY_GRACE_PERIOD_HOURS") {
            self.safety.grace_period_hours = parse_u64("RECLAIM_SAFETY_GRACE_PERIOD_HOURS", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SAFETY_BREAKER_FAILURE_THRESHOLD") {
            self.safety.breaker_failure_threshold =
                parse_u32("RECLAIM_SAFETY_BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SAFETY_BREAKER_RECOVERY_SECS") {
            self.safety.breaker_recovery_secs =
                parse_u64("RECLAIM_SAFETY_BREAKER_RECOVERY_SECS", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SAFETY_BREAKER_SUCCESS_THRESHOLD") {
            self.safety.breaker_success_threshold =
                parse_u32("RECLAIM_SAFETY_BREAKER_SUCCESS_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("RECLAIM_SCHEDULER_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs =
                parse_u64("RECLAIM_SCHEDULER_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SCHEDULER_MAX_CONCURRENT_TENANTS") {
            self.scheduler.max_concurrent_tenants =
                parse_u32("RECLAIM_SCHEDULER_MAX_CONCURRENT_TENANTS", &value)? as usize;
        }
        if let Some(value) = read_env("RECLAIM_SCHEDULER_AUTOPILOT_ENABLED") {
            self.scheduler.autopilot_enabled =
                parse_bool("RECLAIM_SCHEDULER_AUTOPILOT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SCHEDULER_AUTOPILOT_MIN_CONFIDENCE") {
            self.scheduler.autopilot_min_confidence =
                parse_f64("RECLAIM_SCHEDULER_AUTOPILOT_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("RECLAIM_JOBS_DEFAULT_TIMEOUT_SECS") {
            self.jobs.default_timeout_secs = parse_u64("RECLAIM_JOBS_DEFAULT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_JOBS_MAX_RETRIES") {
            self.jobs.max_retries = parse_u32("RECLAIM_JOBS_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_JOBS_STALE_AFTER_SECS") {
            self.jobs.stale_after_secs = parse_u64("RECLAIM_JOBS_STALE_AFTER_SECS", &value)?;
        }

        if let Some(value) = read_env("RECLAIM_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RECLAIM_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("RECLAIM_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("RECLAIM_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RECLAIM_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("RECLAIM_LOGGING_LEVEL").or_else(|| read_env("RECLAIM_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RECLAIM_LOGGING_FORMAT").or_else(|| read_env("RECLAIM_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(ceiling) = overrides.daily_savings_ceiling {
            self.safety.daily_savings_ceiling = ceiling;
        }
        if let Some(enabled) = overrides.autopilot_enabled {
            self.scheduler.autopilot_enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_safety(&self.safety)?;
        validate_scheduler(&self.scheduler)?;
        validate_jobs(&self.jobs)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reclaim.toml"), PathBuf::from("config/reclaim.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_safety(safety: &SafetyConfig) -> Result<(), ConfigError> {
    if safety.daily_savings_ceiling <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "safety.daily_savings_ceiling must be greater than zero".to_string(),
        ));
    }

    if safety.default_monthly_cap <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "safety.default_monthly_cap must be greater than zero".to_string(),
        ));
    }

    if safety.grace_period_hours == 0 || safety.grace_period_hours > 168 {
        return Err(ConfigError::Validation(
            "safety.grace_period_hours must be in range 1..=168".to_string(),
        ));
    }

    if safety.breaker_failure_threshold == 0 || safety.breaker_success_threshold == 0 {
        return Err(ConfigError::Validation(
            "safety breaker thresholds must be greater than zero".to_string(),
        ));
    }

    if safety.breaker_recovery_secs == 0 {
        return Err(ConfigError::Validation(
            "safety.breaker_recovery_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if scheduler.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if scheduler.max_concurrent_tenants == 0 || scheduler.max_concurrent_tenants > 64 {
        return Err(ConfigError::Validation(
            "scheduler.max_concurrent_tenants must be in range 1..=64".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&scheduler.autopilot_min_confidence) {
        return Err(ConfigError::Validation(
            "scheduler.autopilot_min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_jobs(jobs: &JobConfig) -> Result<(), ConfigError> {
    if jobs.default_timeout_secs == 0 || jobs.default_timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "jobs.default_timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    if jobs.stale_after_secs < jobs.default_timeout_secs {
        return Err(ConfigError::Validation(
            "jobs.stale_after_secs must be at least jobs.default_timeout_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| {
        ConfigError::Validation(format!("`{key}` must be a decimal amount, got `{value}`"))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    safety: Option<SafetyPatch>,
    scheduler: Option<SchedulerPatch>,
    jobs: Option<JobsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

// Money values are TOML strings ("500.00") so they survive the trip into
// Decimal without float rounding.
#[derive(Debug, Default, Deserialize)]
struct SafetyPatch {
    daily_savings_ceiling: Option<String>,
    default_monthly_cap: Option<String>,
    grace_period_hours: Option<u64>,
    breaker_failure_threshold: Option<u32>,
    breaker_recovery_secs: Option<u64>,
    breaker_success_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    sweep_interval_secs: Option<u64>,
    max_concurrent_tenants: Option<usize>,
    autopilot_enabled: Option<bool>,
    autopilot_min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct JobsPatch {
    default_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    stale_after_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
