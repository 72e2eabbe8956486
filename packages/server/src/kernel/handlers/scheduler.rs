//! Scheduler worker: executes the HTTP call of a fired schedule.
//!
//! Jobs in the `scheduler` queue carry `{ "scheduleId": ... }`. A missing
//! or disabled schedule is a successful no-op. HTTP 4xx responses are
//! final failures (no retry); >= 500 and network errors are retryable and
//! flow through the job's retry policy, which the tick copied from the
//! schedule.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::kernel::jobs::{HandlerFailure, Job, JobContext, JobHandler};
use crate::kernel::scheduler::model::ExecutionStatus;
use crate::kernel::scheduler::{Schedule, ScheduleStore};

#[derive(Debug, Deserialize)]
struct ScheduleJobData {
    #[serde(rename = "scheduleId")]
    schedule_id: String,
}

pub struct ScheduleExecutionHandler {
    schedules: Arc<ScheduleStore>,
    http: reqwest::Client,
}

impl ScheduleExecutionHandler {
    pub fn new(schedules: Arc<ScheduleStore>, http: reqwest::Client) -> Self {
        Self { schedules, http }
    }

    async fn record(&self, schedule_id: &str, status: ExecutionStatus, error: Option<String>) {
        if let Err(e) = self
            .schedules
            .record_execution(schedule_id, status, error)
            .await
        {
            tracing::error!(
                schedule_id = %schedule_id,
                error = %e,
                "failed to record schedule execution"
            );
        }
    }

    async fn perform_call(&self, schedule: &Schedule) -> Result<u16, String> {
        let endpoint = &schedule.endpoint;
        let method = Method::from_bytes(endpoint.method.to_uppercase().as_bytes())
            .map_err(|_| format!("unsupported method '{}'", endpoint.method))?;

        let mut builder = self
            .http
            .request(method, &endpoint.url)
            .timeout(Duration::from_secs(endpoint.clamped_timeout_secs()));
        for (name, value) in &endpoint.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &endpoint.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", endpoint.url, e))?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl JobHandler for ScheduleExecutionHandler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&self, job: &Job, _ctx: &JobContext) -> Result<Value, HandlerFailure> {
        let data: ScheduleJobData = serde_json::from_value(job.data.clone())
            .map_err(|e| HandlerFailure::non_retryable(format!("invalid scheduler job: {}", e)))?;

        let schedule = match self
            .schedules
            .get(&data.schedule_id)
            .await
            .map_err(HandlerFailure::retryable)?
        {
            Some(schedule) => schedule,
            None => {
                tracing::info!(schedule_id = %data.schedule_id, "schedule gone, skipping");
                return Ok(json!({ "skipped": true, "reason": "schedule not found" }));
            }
        };

        // A one-shot schedule is disabled when its fire is claimed; still
        // execute it. Only schedules the operator switched off are skipped.
        if !schedule.enabled && schedule.is_recurring() {
            tracing::info!(schedule_id = %schedule.schedule_id, "schedule disabled, skipping");
            return Ok(json!({ "skipped": true, "reason": "schedule disabled" }));
        }

        match self.perform_call(&schedule).await {
            Ok(status) if status < 400 => {
                self.record(&schedule.schedule_id, ExecutionStatus::Success, None)
                    .await;
                Ok(json!({ "success": true, "status": status }))
            }
            Ok(status) if status < 500 => {
                let error = format!("endpoint returned HTTP {}", status);
                self.record(
                    &schedule.schedule_id,
                    ExecutionStatus::Failed,
                    Some(error.clone()),
                )
                .await;
                Err(HandlerFailure::non_retryable(error))
            }
            Ok(status) => {
                let error = format!("endpoint returned HTTP {}", status);
                self.record(
                    &schedule.schedule_id,
                    ExecutionStatus::Failed,
                    Some(error.clone()),
                )
                .await;
                Err(HandlerFailure::retryable(error))
            }
            Err(error) => {
                self.record(
                    &schedule.schedule_id,
                    ExecutionStatus::Failed,
                    Some(error.clone()),
                )
                .await;
                Err(HandlerFailure::retryable(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_job_data_uses_camel_case_key() {
        let data: ScheduleJobData =
            serde_json::from_value(json!({"scheduleId": "sched_1"})).unwrap();
        assert_eq!(data.schedule_id, "sched_1");

        let missing: Result<ScheduleJobData, _> = serde_json::from_value(json!({}));
        assert!(missing.is_err());
    }
}
