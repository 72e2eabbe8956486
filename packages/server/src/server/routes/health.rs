use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::kernel::jobs::QueueStats;
use crate::kernel::{Identity, ServiceDeps};

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    kv_store: ComponentHealth,
    document_store: ComponentHealth,
    event_bus: String,
    queues: HashMap<String, QueueStats>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error),
        }
    }
}

/// Health check endpoint
///
/// Checks:
/// - KV store connectivity (PING)
/// - Document store connectivity (ping command)
/// - Per-queue stats
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(deps): Extension<Arc<ServiceDeps>>,
) -> (StatusCode, Json<HealthResponse>) {
    let kv_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        deps.ping_kv(),
    )
    .await
    {
        Ok(Ok(())) => ComponentHealth::ok(),
        Ok(Err(e)) => ComponentHealth::error(format!("ping failed: {}", e)),
        Err(_) => ComponentHealth::error("ping timeout (>5s)".to_string()),
    };

    let document_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        deps.ping_documents(),
    )
    .await
    {
        Ok(Ok(())) => ComponentHealth::ok(),
        Ok(Err(e)) => ComponentHealth::error(format!("ping failed: {}", e)),
        Err(_) => ComponentHealth::error("ping timeout (>5s)".to_string()),
    };

    let queues = deps
        .manager
        .all_stats(&Identity::master())
        .await
        .unwrap_or_default();

    let is_healthy = kv_health.status == "ok" && document_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            kv_store: kv_health,
            document_store: document_health,
            event_bus: "ok".to_string(),
            queues,
        }),
    )
}
