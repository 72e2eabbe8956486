//! Schedule CRUD and control. Internal surface: these routes are mounted
//! without tenant authentication (single-tenant by design).

use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::jobs::SubmitOptions;
use crate::kernel::scheduler::{
    EndpointSpec, RetryPolicy, Schedule, ScheduleSpec, SCHEDULER_QUEUE,
};
use crate::kernel::{Identity, ServiceDeps};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub endpoint: EndpointSpec,
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_by: Option<String>,
}

pub async fn create_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedule = Schedule::create(
        body.name,
        body.endpoint,
        body.schedule,
        body.retry_policy.unwrap_or_default(),
        body.metadata.unwrap_or(Value::Null),
        body.created_by.unwrap_or_else(|| "internal".to_string()),
    )?;

    deps.schedules
        .insert(&schedule)
        .await
        .map_err(|e| ServiceError::action("create_schedule", e))?;
    Ok(success(schedule, &request_id))
}

pub async fn list_schedules(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedules = deps
        .schedules
        .list()
        .await
        .map_err(|e| ServiceError::action("list_schedules", e))?;
    Ok(success(json!({ "schedules": schedules }), &request_id))
}

pub async fn get_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedule = deps
        .schedules
        .get(&id)
        .await
        .map_err(|e| ServiceError::action("get_schedule", e))?
        .ok_or(ServiceError::ScheduleNotFound(id))?;
    Ok(success(schedule, &request_id))
}

pub async fn update_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let mut schedule = deps
        .schedules
        .get(&id)
        .await
        .map_err(|e| ServiceError::action("update_schedule", e))?
        .ok_or_else(|| ServiceError::ScheduleNotFound(id.clone()))?;

    let retry_policy = body
        .retry_policy
        .unwrap_or_else(|| schedule.retry_policy.clone());
    schedule.apply_update(
        body.name,
        body.endpoint,
        body.schedule,
        retry_policy,
        body.metadata.unwrap_or(Value::Null),
    )?;

    deps.schedules
        .replace(&schedule)
        .await
        .map_err(|e| ServiceError::action("update_schedule", e))?;
    Ok(success(schedule, &request_id))
}

pub async fn delete_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let deleted = deps
        .schedules
        .delete(&id)
        .await
        .map_err(|e| ServiceError::action("delete_schedule", e))?;
    if !deleted {
        return Err(ServiceError::ScheduleNotFound(id));
    }
    Ok(success(json!({ "id": id, "deleted": true }), &request_id))
}

pub async fn toggle_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedule = deps
        .schedules
        .toggle(&id)
        .await
        .map_err(|e| ServiceError::action("toggle_schedule", e))?
        .ok_or(ServiceError::ScheduleNotFound(id))?;
    Ok(success(schedule, &request_id))
}

/// Fire the schedule immediately, bypassing its cron grid. The execution
/// flows through the normal scheduler queue.
pub async fn execute_schedule(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedule = deps
        .schedules
        .get(&id)
        .await
        .map_err(|e| ServiceError::action("execute_schedule", e))?
        .ok_or_else(|| ServiceError::ScheduleNotFound(id.clone()))?;

    let options = SubmitOptions {
        attempts: Some(schedule.retry_policy.attempts),
        backoff: Some(schedule.retry_policy.backoff),
        ..Default::default()
    };
    let job = deps
        .manager
        .enqueue(
            &Identity::master(),
            SCHEDULER_QUEUE,
            "scheduler",
            json!({ "scheduleId": schedule.schedule_id }),
            options,
            Map::new(),
            None,
            &request_id,
        )
        .await?;

    Ok(success(
        json!({ "scheduleId": id, "jobId": job.job_id }),
        &request_id,
    ))
}
