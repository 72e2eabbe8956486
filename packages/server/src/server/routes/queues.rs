//! Queue listing, stats and control.

use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::jobs::TerminalBucket;
use crate::kernel::{Identity, ServiceDeps};

pub async fn list_queues(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = deps.manager.all_stats(&identity).await?;
    let mut queues: Vec<_> = stats
        .into_iter()
        .map(|(name, stats)| json!({ "name": name, "stats": stats }))
        .collect();
    queues.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Ok(success(json!({ "queues": queues }), &request_id))
}

pub async fn queue_stats(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = deps.manager.stats(&identity, &name).await?;
    Ok(success(json!({ "queue": name, "stats": stats }), &request_id))
}

pub async fn pause_queue(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    deps.manager.pause(&identity, &name).await?;
    Ok(success(json!({ "queue": name, "paused": true }), &request_id))
}

pub async fn resume_queue(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    deps.manager.resume(&identity, &name).await?;
    Ok(success(json!({ "queue": name, "paused": false }), &request_id))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanQueueRequest {
    /// Terminal jobs older than this are removed. Zero removes everything
    /// in the bucket.
    #[serde(default)]
    pub older_than_ms: u64,
    /// `completed`, `failed`, or omitted for both.
    #[serde(default)]
    pub bucket: Option<String>,
}

pub async fn clean_queue(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
    body: Option<Json<CleanQueueRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(body) = body.unwrap_or_default();
    let bucket = match body.bucket.as_deref() {
        None => None,
        Some("completed") => Some(TerminalBucket::Completed),
        Some("failed") => Some(TerminalBucket::Failed),
        Some(other) => {
            return Err(ServiceError::Validation(format!(
                "unknown bucket '{}', expected 'completed' or 'failed'",
                other
            )));
        }
    };

    let removed = deps
        .manager
        .clean(&identity, &name, body.older_than_ms, bucket)
        .await?;
    Ok(success(
        json!({ "queue": name, "removed": removed }),
        &request_id,
    ))
}
