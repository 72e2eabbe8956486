//! Redis-compatible KV backend dialing.
//!
//! Queue state lives entirely in this store; all mutation goes through the
//! atomic primitives in [`crate::kernel::jobs::store`]. This module only
//! knows how to dial.
//!
//! Managed-DB endpoints terminate TLS on a dedicated port (25061 by
//! default). When the configured port matches, we dial `rediss://` with
//! certificate verification disabled — the managed certificates are not in
//! the container trust store. This relaxation is inherited from the
//! deployment environment and is a known security trade-off.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Config;

/// Minimum number of multiplexed connections; one for the API surface, one
/// for the worker runtime, so slow worker polls never starve API calls.
const MIN_POOL_SIZE: usize = 2;

/// Build the connection URL from configuration.
pub fn connection_url(config: &Config) -> String {
    let scheme = if config.redis_uses_tls() {
        "rediss"
    } else {
        "redis"
    };
    let auth = match &config.redis_password {
        Some(password) => format!(":{}@", password),
        None => String::new(),
    };
    // `#insecure` tells the client to accept unverified peer certificates.
    let fragment = if config.redis_uses_tls() {
        "#insecure"
    } else {
        ""
    };
    format!(
        "{}://{}{}:{}/{}{}",
        scheme, auth, config.redis_host, config.redis_port, config.redis_db, fragment
    )
}

/// A small pool of independent multiplexed connections.
///
/// `ConnectionManager` already multiplexes and reconnects; the pool exists
/// so distinct subsystems do not share one pipeline head-of-line.
pub struct KvPool {
    managers: Vec<ConnectionManager>,
    next: AtomicUsize,
}

impl KvPool {
    /// Dial `size` connections (clamped to at least [`MIN_POOL_SIZE`]).
    pub async fn connect(config: &Config, size: usize) -> Result<Self> {
        let url = connection_url(config);
        let client = redis::Client::open(url.as_str())
            .context("invalid KV connection URL")?;

        let size = size.max(MIN_POOL_SIZE);
        let mut managers = Vec::with_capacity(size);
        for _ in 0..size {
            let manager = client
                .get_connection_manager()
                .await
                .context("failed to connect to KV store")?;
            managers.push(manager);
        }

        tracing::info!(
            host = %config.redis_host,
            port = config.redis_port,
            tls = config.redis_uses_tls(),
            connections = size,
            "KV store connected"
        );

        Ok(Self {
            managers,
            next: AtomicUsize::new(0),
        })
    }

    /// Hand out a connection round-robin. Cloning a `ConnectionManager` is
    /// cheap and shares the underlying multiplexed channel.
    pub fn manager(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.managers.len();
        self.managers[index].clone()
    }

    pub fn size(&self) -> usize {
        self.managers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(port: u16, password: Option<&str>) -> Config {
        Config {
            port: 3000,
            redis_host: "kv.internal".to_string(),
            redis_port: port,
            redis_password: password.map(str::to_string),
            redis_db: 2,
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
    fn plain_port_dials_plain_tcp() {
        let url = connection_url(&config_with(6379, None));
        assert_eq!(url, "redis://kv.internal:6379/2");
    }

    #[test]
    fn managed_tls_port_dials_rediss_insecure() {
        let url = connection_url(&config_with(25061, None));
        assert_eq!(url, "rediss://kv.internal:25061/2#insecure");
    }

    #[test]
    fn password_is_embedded() {
        let url = connection_url(&config_with(6379, Some("s3cret")));
        assert_eq!(url, "redis://:s3cret@kv.internal:6379/2");
    }
}
