//! Self-documentation endpoints.
//!
//! The service is designed for machine consumers: `/api/explain` describes
//! the surface, and every error response carries hints, possible causes
//! and suggested fixes. These routes are public.

use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use serde_json::{json, Value};

use crate::common::{success, RequestId, ServiceError};

fn topics() -> Value {
    json!({
        "service": "multi-tenant job queue",
        "authentication": "send your API key in the x-api-key header",
        "topics": ["jobs", "queues", "subscriptions", "schedules", "applications", "errors"],
        "hint": "GET /api/explain/{topic} for details",
    })
}

fn explain(topic: &str) -> Option<Value> {
    let detail = match topic {
        "jobs" => json!({
            "submit": { "route": "POST /api/jobs/{queue}", "body": { "name": "handler hint (optional)", "data": "opaque JSON payload", "options": { "attempts": "1..", "backoff": { "type": "exponential|fixed", "delay": "ms" }, "delay": "ms before first run", "priority": "0..100, higher first", "timeout_ms": "per-job timeout" }, "metadata": "key/value map matched by subscription filters", "webhooks": "event -> URL overrides" } },
            "status": "GET /api/jobs/{queue}/{jobId}",
            "cancel": "DELETE /api/jobs/{queue}/{jobId} (non-terminal only)",
            "list": "GET /api/jobs/{queue}?status=waiting|active|delayed|completed|failed&limit=N",
            "lifecycle": ["waiting", "active", "delayed", "completed", "failed", "paused"],
            "delivery": "at-least-once; handlers must tolerate re-execution",
        }),
        "queues" => json!({
            "list": "GET /api/queues (queues your key may touch)",
            "stats": "GET /api/queues/{name}/stats",
            "control": "POST /api/queues/{name}/pause|resume|clean (master key only)",
            "creation": "queues are created lazily on first submission",
        }),
        "subscriptions" => json!({
            "create": { "route": "POST /api/subscriptions", "body": { "name": "label", "endpoint": "http(s) callback URL", "method": "POST|PUT", "events": ["created", "started", "progress", "completed", "failed"], "filters": { "queues": "optional list", "statuses": "optional list", "metadata": "required key/value pairs" }, "retryConfig": { "max_attempts": "default 3", "backoff_ms": "fixed backoff" } } },
            "item": "GET/PUT/DELETE /api/subscriptions/{id}",
            "test": "POST /api/subscriptions/{id}/test (one synthetic delivery, counters untouched)",
        }),
        "schedules" => json!({
            "create": { "route": "POST /api/schedules", "body": { "name": "label", "endpoint": { "url": "target", "method": "HTTP method", "timeout_secs": "1..300" }, "schedule": { "cron": "5-field cron (exclusive with 'at')", "at": "one-shot instant", "timezone": "IANA zone", "end_date": "optional stop", "limit": "optional max fires" }, "retry_policy": { "attempts": "1..10", "backoff": {} } } },
            "item": "GET/PUT/DELETE /api/schedules/{id}",
            "toggle": "POST /api/schedules/{id}/toggle",
            "execute": "POST /api/schedules/{id}/execute (fire now)",
            "tick": "due schedules fire on a one-minute tick; 4xx responses are final, 5xx retried",
        }),
        "applications" => json!({
            "create": "POST /api/applications (master key only); the API key appears once in the response and is stored hashed",
            "list": "GET /api/applications",
            "item": "GET/PATCH/DELETE /api/applications/{id}",
            "settings": { "allowedQueues": "queue names, prefix patterns ('email-*') or '*'" },
        }),
        "errors" => json!({
            "envelope": { "success": false, "error": { "code": "stable string", "message": "human text", "hints": [], "possibleCauses": [], "suggestedFixes": [] } },
            "codes": [
                "MISSING_API_KEY", "INVALID_API_KEY", "UNAUTHORIZED", "FORBIDDEN",
                "QUEUE_ACCESS_DENIED", "QUEUE_NOT_FOUND", "JOB_NOT_FOUND",
                "MISSING_DATA", "VALIDATION_ERROR", "RATE_LIMIT_EXCEEDED",
            ],
        }),
        _ => return None,
    };
    Some(detail)
}

pub async fn explain_index(
    Extension(request_id): Extension<RequestId>,
) -> impl IntoResponse {
    success(topics(), &request_id)
}

pub async fn explain_topic(
    Extension(request_id): Extension<RequestId>,
    Path(topic): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = explain(&topic).ok_or_else(|| {
        ServiceError::Validation(format!(
            "unknown topic '{}'; try GET /api/explain",
            topic
        ))
    })?;
    Ok(success(json!({ "topic": topic, "detail": detail }), &request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_advertised_topic_resolves() {
        let index = topics();
        for topic in index["topics"].as_array().unwrap() {
            assert!(explain(topic.as_str().unwrap()).is_some());
        }
    }

    #[test]
    fn unknown_topics_are_rejected() {
        assert!(explain("astrology").is_none());
    }
}
