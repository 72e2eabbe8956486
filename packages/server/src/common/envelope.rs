//! JSON response envelope shared by every API route.
//!
//! Success: `{"success": true, "data": ..., "metadata": {"timestamp", "request_id"}}`
//! Errors carry a structured `error` object instead of `data`; see
//! [`crate::common::error`].

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Per-request identity, inserted by middleware and threaded into the
/// response envelope and job `_metadata`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl ResponseMetadata {
    pub fn new(request_id: &RequestId) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.0.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub metadata: ResponseMetadata,
}

/// Wrap a payload in the success envelope.
pub fn success<T: Serialize>(data: T, request_id: &RequestId) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
        metadata: ResponseMetadata::new(request_id),
    })
}

/// Build the error envelope body from a structured error object.
pub fn failure(error: Value, request_id: &RequestId) -> Json<Envelope<Value>> {
    Json(Envelope {
        success: false,
        data: None,
        error: Some(error),
        metadata: ResponseMetadata::new(request_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let request_id = RequestId("req-1".to_string());
        let Json(envelope) = success(serde_json::json!({"job_id": "j-1"}), &request_id);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["job_id"], "j-1");
        assert_eq!(value["metadata"]["requestId"], "req-1");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_envelope_carries_error_object() {
        let request_id = RequestId::generate();
        let Json(envelope) = failure(serde_json::json!({"code": "JOB_NOT_FOUND"}), &request_id);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "JOB_NOT_FOUND");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn generated_request_ids_are_unique() {
        assert_ne!(RequestId::generate().0, RequestId::generate().0);
    }
}
