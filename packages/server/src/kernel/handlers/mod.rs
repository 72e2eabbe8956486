//! Built-in handler families.
//!
//! Each family binds to the queue of the same name. The webhook, email and
//! ai families validate their payloads here; their external effects are
//! opaque collaborators. The `scheduler` queue hosts the scheduler worker.

pub mod ai;
pub mod email;
pub mod placeholder;
pub mod scheduler;
pub mod webhook;

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::kernel::jobs::HandlerRegistry;
use crate::kernel::scheduler::{ScheduleStore, SCHEDULER_CONCURRENCY, SCHEDULER_QUEUE};

pub use ai::AiProcessingHandler;
pub use email::EmailHandler;
pub use placeholder::{PlaceholderHandler, PLACEHOLDER_FAMILIES};
pub use scheduler::ScheduleExecutionHandler;
pub use webhook::WebhookHandler;

/// Worker concurrency for a handler family: CPU-bound families get half
/// the configured ceiling, memory-bound families a third.
pub fn concurrency_for_family(config: &Config, family: &str) -> usize {
    let ceiling = config.max_workers_per_queue;
    match family {
        "image-processing" | "pdf-generation" => (ceiling / 2).max(1),
        "data-export" | "web-scraping" => (ceiling / 3).max(1),
        _ => ceiling,
    }
}

/// Register every built-in family plus the scheduler worker.
pub fn register_builtin_handlers(
    registry: &HandlerRegistry,
    config: &Config,
    schedules: Arc<ScheduleStore>,
    http: reqwest::Client,
) -> Result<()> {
    registry.register(
        "webhook",
        concurrency_for_family(config, "webhook"),
        Arc::new(WebhookHandler::new(http.clone())),
    )?;
    registry.register(
        "email",
        concurrency_for_family(config, "email"),
        Arc::new(EmailHandler::new()),
    )?;
    registry.register(
        "ai-processing",
        concurrency_for_family(config, "ai-processing"),
        Arc::new(AiProcessingHandler::new()),
    )?;

    for &family in PLACEHOLDER_FAMILIES {
        registry.register(
            family,
            concurrency_for_family(config, family),
            Arc::new(PlaceholderHandler::new(family)),
        )?;
    }

    registry.register(
        SCHEDULER_QUEUE,
        SCHEDULER_CONCURRENCY,
        Arc::new(ScheduleExecutionHandler::new(schedules, http)),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_ceiling(ceiling: usize) -> Config {
        Config {
            port: 3000,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            redis_tls_port: 25061,
            mongodb_uri: String::new(),
            mongodb_database: String::new(),
            master_api_key: "master-key-0123456789abcdef".to_string(),
            auth_enabled: true,
            max_workers_per_queue: ceiling,
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
    fn cpu_bound_families_are_halved_and_memory_bound_thirded() {
        let config = config_with_ceiling(6);
        assert_eq!(concurrency_for_family(&config, "webhook"), 6);
        assert_eq!(concurrency_for_family(&config, "image-processing"), 3);
        assert_eq!(concurrency_for_family(&config, "pdf-generation"), 3);
        assert_eq!(concurrency_for_family(&config, "data-export"), 2);
        assert_eq!(concurrency_for_family(&config, "web-scraping"), 2);
    }

    #[test]
    fn concurrency_never_drops_to_zero() {
        let config = config_with_ceiling(1);
        assert_eq!(concurrency_for_family(&config, "image-processing"), 1);
        assert_eq!(concurrency_for_family(&config, "data-export"), 1);
    }
}
