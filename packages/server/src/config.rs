use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
///
/// Materialized once at startup and passed around frozen; nothing outside
/// this module reads the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,

    // KV store (Redis-compatible)
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: i64,
    /// Port on which the managed-DB endpoint terminates TLS. Dialing this
    /// port switches the client to `rediss://` with certificate
    /// verification disabled (see `kernel::kv`).
    pub redis_tls_port: u16,

    // Document store
    pub mongodb_uri: String,
    pub mongodb_database: String,

    // Tenancy
    pub master_api_key: String,
    pub auth_enabled: bool,

    // Queue defaults
    pub max_workers_per_queue: usize,
    pub default_job_attempts: u32,
    pub default_backoff_delay_ms: u64,
    pub default_job_timeout_ms: u64,

    // Retention for terminal buckets
    pub completed_retention_secs: u64,
    pub completed_retention_count: u64,
    pub failed_retention_secs: u64,
    pub failed_retention_count: u64,

    // Scheduler
    pub scheduler_tick_secs: u64,

    // Metrics
    pub metrics_enabled: bool,
    pub metrics_port: u16,

    // Rate limiting
    pub rate_limit_window_secs: u64,
    pub rate_limit_max: u32,

    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Invalid configuration is fatal: the process refuses to start.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let config = Self {
            port: parse_var("PORT", 3000)?,
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: parse_var("REDIS_PORT", 6379)?,
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            redis_db: parse_var("REDIS_DB", 0)?,
            redis_tls_port: parse_var("REDIS_TLS_PORT", 25061)?,
            mongodb_uri: env::var("MONGODB_URI")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "jobservice".to_string()),
            master_api_key: env::var("MASTER_API_KEY").context("MASTER_API_KEY must be set")?,
            auth_enabled: parse_var("AUTH_ENABLED", true)?,
            max_workers_per_queue: parse_var("MAX_WORKERS_PER_QUEUE", 5)?,
            default_job_attempts: parse_var("DEFAULT_JOB_ATTEMPTS", 3)?,
            default_backoff_delay_ms: parse_var("DEFAULT_BACKOFF_DELAY_MS", 5_000)?,
            default_job_timeout_ms: parse_var("DEFAULT_JOB_TIMEOUT_MS", 30_000)?,
            completed_retention_secs: parse_var("COMPLETED_RETENTION_SECS", 3_600)?,
            completed_retention_count: parse_var("COMPLETED_RETENTION_COUNT", 1_000)?,
            failed_retention_secs: parse_var("FAILED_RETENTION_SECS", 86_400)?,
            failed_retention_count: parse_var("FAILED_RETENTION_COUNT", 5_000)?,
            scheduler_tick_secs: parse_var("SCHEDULER_TICK_SECS", 60)?,
            metrics_enabled: parse_var("METRICS_ENABLED", false)?,
            metrics_port: parse_var("METRICS_PORT", 9090)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", 60)?,
            rate_limit_max: parse_var("RATE_LIMIT_MAX", 600)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.master_api_key.len() < 16 {
            bail!("MASTER_API_KEY must be at least 16 characters");
        }
        if self.max_workers_per_queue == 0 {
            bail!("MAX_WORKERS_PER_QUEUE must be at least 1");
        }
        if self.default_job_attempts == 0 {
            bail!("DEFAULT_JOB_ATTEMPTS must be at least 1");
        }
        if self.scheduler_tick_secs == 0 {
            bail!("SCHEDULER_TICK_SECS must be at least 1");
        }
        if self.rate_limit_window_secs == 0 || self.rate_limit_max == 0 {
            bail!("rate limit window and max must be non-zero");
        }
        Ok(())
    }

    /// Whether the configured Redis port is the TLS-terminating managed port.
    pub fn redis_uses_tls(&self) -> bool {
        self.redis_port == self.redis_tls_port
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            port: 3000,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            redis_tls_port: 25061,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "jobservice".to_string(),
            master_api_key: "master-key-0123456789abcdef".to_string(),
            auth_enabled: true,
            max_workers_per_queue: 5,
            default_job_attempts: 3,
            default_backoff_delay_ms: 5_000,
            default_job_timeout_ms: 30_000,
            completed_retention_secs: 3_600,
            completed_retention_count: 1_000,
            failed_retention_secs: 86_400,
            failed_retention_count: 5_000,
            scheduler_tick_secs: 60,
            metrics_enabled: false,
            metrics_port: 9090,
            rate_limit_window_secs: 60,
            rate_limit_max: 600,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_master_key_is_rejected() {
        let mut config = base_config();
        config.master_api_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = base_config();
        config.max_workers_per_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_detection_matches_port() {
        let mut config = base_config();
        assert!(!config.redis_uses_tls());
        config.redis_port = 25061;
        assert!(config.redis_uses_tls());
    }
}
