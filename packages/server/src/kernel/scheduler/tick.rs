//! The scheduler tick.
//!
//! A periodic task (one-minute cadence by default) queries due schedules,
//! atomically claims each fire by advancing its `next_execution_at`, and
//! enqueues an execution job into the `scheduler` queue. The queued job is
//! then executed by the scheduler worker like any other job, inheriting the
//! schedule's retry policy.
//!
//! A single schedule's failure never affects the others; tick failures are
//! logged and retried on the next tick.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Map};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::store::ScheduleStore;
use super::SCHEDULER_QUEUE;
use crate::common::RequestId;
use crate::kernel::jobs::{QueueManager, SubmitOptions};
use crate::kernel::metrics::Metrics;
use crate::kernel::scheduler::model::Schedule;
use crate::kernel::tenants::Identity;

/// Six-field cron expression for the tick cadence.
pub fn tick_cron_expression(tick_secs: u64) -> String {
    if tick_secs >= 60 {
        "0 * * * * *".to_string()
    } else {
        format!("*/{} * * * * *", tick_secs.max(1))
    }
}

/// Start the periodic scheduler tick.
pub async fn start_scheduler(
    schedules: Arc<ScheduleStore>,
    manager: Arc<QueueManager>,
    metrics: Arc<Metrics>,
    tick_secs: u64,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let expression = tick_cron_expression(tick_secs);
    let tick_job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
        let schedules = schedules.clone();
        let manager = manager.clone();
        let metrics = metrics.clone();
        Box::pin(async move {
            if let Err(e) = run_scheduler_tick(&schedules, &manager, &metrics).await {
                tracing::error!(error = %e, "scheduler tick failed");
            }
        })
    })?;

    scheduler.add(tick_job).await?;
    scheduler.start().await?;

    tracing::info!(tick_secs, "scheduler tick started");
    Ok(scheduler)
}

/// One tick: fire everything due.
pub async fn run_scheduler_tick(
    schedules: &ScheduleStore,
    manager: &QueueManager,
    metrics: &Metrics,
) -> Result<()> {
    let now = Utc::now();
    let due = schedules.find_due(now).await?;
    if due.is_empty() {
        return Ok(());
    }

    tracing::debug!(count = due.len(), "due schedules");
    for schedule in due {
        let schedule_id = schedule.schedule_id.clone();
        if let Err(e) = fire_schedule(schedule, schedules, manager, metrics).await {
            tracing::error!(schedule_id = %schedule_id, error = %e, "schedule fire failed");
        }
    }
    Ok(())
}

async fn fire_schedule(
    schedule: Schedule,
    schedules: &ScheduleStore,
    manager: &QueueManager,
    metrics: &Metrics,
) -> Result<()> {
    let now = Utc::now();

    // Past its end date or over its limit: disable so it stops matching
    // the due query.
    if !schedule.within_bounds(now) {
        schedules.claim_fire(&schedule, None).await?;
        tracing::info!(
            schedule_id = %schedule.schedule_id,
            "schedule exhausted its bounds, disabled"
        );
        return Ok(());
    }

    // Advance-then-enqueue: claiming the fire first means a concurrent
    // instance observing the same due schedule enqueues nothing.
    let next = if schedule.is_recurring() {
        schedule
            .fire_after(now)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
    } else {
        None
    };

    if !schedules.claim_fire(&schedule, next).await? {
        tracing::debug!(
            schedule_id = %schedule.schedule_id,
            "fire already claimed by another instance"
        );
        return Ok(());
    }

    let options = SubmitOptions {
        attempts: Some(schedule.retry_policy.attempts),
        backoff: Some(schedule.retry_policy.backoff),
        ..Default::default()
    };
    manager
        .enqueue(
            &Identity::master(),
            SCHEDULER_QUEUE,
            "scheduler",
            json!({ "scheduleId": schedule.schedule_id }),
            options,
            Map::new(),
            None,
            &RequestId::generate(),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    metrics.schedule_fired();
    tracing::info!(
        schedule_id = %schedule.schedule_id,
        next_execution_at = ?next,
        "schedule fired"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_tick_fires_on_the_minute() {
        assert_eq!(tick_cron_expression(60), "0 * * * * *");
        assert_eq!(tick_cron_expression(300), "0 * * * * *");
    }

    #[test]
    fn sub_minute_ticks_use_second_steps() {
        assert_eq!(tick_cron_expression(15), "*/15 * * * * *");
        assert_eq!(tick_cron_expression(0), "*/1 * * * * *");
    }
}
