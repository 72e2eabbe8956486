//! Simple job tracker routes: submit, status, list, update for
//! out-of-band workers.

use axum::extract::{Extension, Path, Query};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::jobs::tracker::parse_metadata_predicates;
use crate::kernel::jobs::{JobStatus, SubmitOptions, TrackerQuery, TrackerUpdate};
use crate::kernel::{Identity, ServiceDeps};

#[derive(Debug, Deserialize)]
pub struct TrackerSubmitRequest {
    pub queue: String,
    #[serde(default)]
    pub name: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub options: Option<SubmitOptions>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub async fn tracker_submit(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<TrackerSubmitRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let job = deps
        .manager
        .enqueue(
            &identity,
            &body.queue,
            body.name.as_deref().unwrap_or(&body.queue),
            body.data,
            body.options.unwrap_or_default(),
            body.metadata.unwrap_or_default(),
            None,
            &request_id,
        )
        .await?;
    Ok(success(
        json!({ "jobId": job.job_id, "queue": job.queue_name, "status": job.status.as_str() }),
        &request_id,
    ))
}

pub async fn tracker_status(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let job = deps.tracker.status(&identity, &job_id).await?;
    Ok(success(job, &request_id))
}

pub async fn tracker_list(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = match params.get("status") {
        Some(raw) => Some(
            serde_json::from_value::<JobStatus>(Value::String(raw.clone()))
                .map_err(|_| ServiceError::Validation(format!("unknown status '{}'", raw)))?,
        ),
        None => None,
    };
    let limit = params
        .get("limit")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(100);

    let query = TrackerQuery {
        queue: params.get("queue").cloned(),
        status,
        metadata: parse_metadata_predicates(&params),
        limit,
    };

    let jobs = deps.tracker.list(&identity, query).await?;
    Ok(success(json!({ "jobs": jobs }), &request_id))
}

pub async fn tracker_update(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<String>,
    Json(update): Json<TrackerUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    let job = deps.tracker.update(&identity, &job_id, update).await?;
    Ok(success(job, &request_id))
}
