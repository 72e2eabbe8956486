//! Prometheus-style counters for the queue core.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    jobs_enqueued: IntCounterVec,
    jobs_completed: IntCounterVec,
    jobs_failed: IntCounterVec,
    jobs_active: IntGaugeVec,
    webhook_deliveries: IntCounterVec,
    schedule_fires: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_enqueued = IntCounterVec::new(
            Opts::new("jobs_enqueued_total", "Jobs accepted into a queue"),
            &["queue"],
        )?;
        let jobs_completed = IntCounterVec::new(
            Opts::new("jobs_completed_total", "Jobs finished successfully"),
            &["queue"],
        )?;
        let jobs_failed = IntCounterVec::new(
            Opts::new("jobs_failed_total", "Jobs failed terminally"),
            &["queue"],
        )?;
        let jobs_active = IntGaugeVec::new(
            Opts::new("jobs_active", "Jobs currently executing"),
            &["queue"],
        )?;
        let webhook_deliveries = IntCounterVec::new(
            Opts::new("webhook_deliveries_total", "Subscription callback attempts"),
            &["outcome"],
        )?;
        let schedule_fires =
            IntCounter::new("schedule_fires_total", "Schedules fired by the tick")?;

        registry
            .register(Box::new(jobs_enqueued.clone()))
            .context("register jobs_enqueued")?;
        registry
            .register(Box::new(jobs_completed.clone()))
            .context("register jobs_completed")?;
        registry
            .register(Box::new(jobs_failed.clone()))
            .context("register jobs_failed")?;
        registry
            .register(Box::new(jobs_active.clone()))
            .context("register jobs_active")?;
        registry
            .register(Box::new(webhook_deliveries.clone()))
            .context("register webhook_deliveries")?;
        registry
            .register(Box::new(schedule_fires.clone()))
            .context("register schedule_fires")?;

        Ok(Self {
            registry,
            jobs_enqueued,
            jobs_completed,
            jobs_failed,
            jobs_active,
            webhook_deliveries,
            schedule_fires,
        })
    }

    pub fn job_enqueued(&self, queue: &str) {
        self.jobs_enqueued.with_label_values(&[queue]).inc();
    }

    pub fn job_started(&self, queue: &str) {
        self.jobs_active.with_label_values(&[queue]).inc();
    }

    pub fn job_completed(&self, queue: &str) {
        self.jobs_active.with_label_values(&[queue]).dec();
        self.jobs_completed.with_label_values(&[queue]).inc();
    }

    pub fn job_failed(&self, queue: &str) {
        self.jobs_active.with_label_values(&[queue]).dec();
        self.jobs_failed.with_label_values(&[queue]).inc();
    }

    pub fn webhook_delivery(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.webhook_deliveries.with_label_values(&[outcome]).inc();
    }

    pub fn schedule_fired(&self) {
        self.schedule_fires.inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics are not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        let metrics = Metrics::new().unwrap();
        metrics.job_enqueued("email");
        metrics.job_started("email");
        metrics.job_completed("email");
        metrics.webhook_delivery(true);
        metrics.schedule_fired();

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("jobs_enqueued_total"));
        assert!(rendered.contains("jobs_completed_total"));
        assert!(rendered.contains("webhook_deliveries_total"));
        assert!(rendered.contains("schedule_fires_total"));
    }

    #[test]
    fn active_gauge_returns_to_zero() {
        let metrics = Metrics::new().unwrap();
        metrics.job_started("email");
        metrics.job_failed("email");
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("jobs_active{queue=\"email\"} 0"));
    }
}
