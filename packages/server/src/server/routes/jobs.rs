//! Job submission, status, listing and cancellation.

use axum::extract::{Extension, Path, Query};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::jobs::{CancelOutcome, JobStatus, SubmitOptions};
use crate::kernel::{Identity, ServiceDeps};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub options: Option<SubmitOptions>,
    /// Caller metadata merged into the job's `_metadata`; what
    /// subscription metadata filters match against.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub webhooks: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn submit_job(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(queue): Path<String>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let job = deps
        .manager
        .enqueue(
            &identity,
            &queue,
            body.name.as_deref().unwrap_or(&queue),
            body.data,
            body.options.unwrap_or_default(),
            body.metadata.unwrap_or_default(),
            body.webhooks,
            &request_id,
        )
        .await?;

    Ok(success(
        json!({
            "jobId": job.job_id,
            "queue": job.queue_name,
            "status": job.status.as_str(),
        }),
        &request_id,
    ))
}

pub async fn get_job(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path((queue, job_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let job = deps.manager.get_job(&identity, &queue, &job_id).await?;
    Ok(success(job, &request_id))
}

pub async fn list_jobs(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(queue): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = query.status.unwrap_or(JobStatus::Waiting);
    let limit = query.limit.unwrap_or(100).min(1_000);
    let jobs = deps
        .manager
        .list_jobs(&identity, &queue, status, limit)
        .await?;
    Ok(success(
        json!({ "queue": queue, "status": status.as_str(), "jobs": jobs }),
        &request_id,
    ))
}

pub async fn cancel_job(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path((queue, job_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = deps.manager.cancel(&identity, &queue, &job_id).await?;
    let outcome = match outcome {
        CancelOutcome::Removed => "removed",
        CancelOutcome::Signalled => "cancellation-signalled",
    };
    Ok(success(
        json!({ "jobId": job_id, "queue": queue, "outcome": outcome }),
        &request_id,
    ))
}
