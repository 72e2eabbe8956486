//! Service error taxonomy.
//!
//! Errors are a tagged sum with stable string codes; the JSON marshalling
//! attaches hints, possible causes and suggested fixes so machine consumers
//! can drive their own recovery. Nothing in the service matches on the
//! string form internally.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;

use super::envelope::{failure, RequestId};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("access to queue '{0}' denied")]
    QueueAccessDenied(String),

    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),

    #[error("schedule '{0}' not found")]
    ScheduleNotFound(String),

    #[error("application '{0}' not found")]
    ApplicationNotFound(String),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Action-qualified internal failure; `action` becomes the code prefix
    /// (e.g. `ENQUEUE_ERROR`).
    #[error("{action} failed: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ServiceError {
    /// Wrap an internal failure under an action-qualified code.
    pub fn action(action: &'static str, source: anyhow::Error) -> Self {
        Self::Action { action, source }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> String {
        match self {
            Self::MissingApiKey => "MISSING_API_KEY".to_string(),
            Self::InvalidApiKey => "INVALID_API_KEY".to_string(),
            Self::Unauthorized(_) => "UNAUTHORIZED".to_string(),
            Self::Forbidden(_) => "FORBIDDEN".to_string(),
            Self::QueueAccessDenied(_) => "QUEUE_ACCESS_DENIED".to_string(),
            Self::QueueNotFound(_) => "QUEUE_NOT_FOUND".to_string(),
            Self::JobNotFound(_) => "JOB_NOT_FOUND".to_string(),
            Self::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND".to_string(),
            Self::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND".to_string(),
            Self::ApplicationNotFound(_) => "APPLICATION_NOT_FOUND".to_string(),
            Self::MissingData(_) => "MISSING_DATA".to_string(),
            Self::Validation(_) => "VALIDATION_ERROR".to_string(),
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED".to_string(),
            Self::Action { action, .. } => format!("{}_ERROR", action.to_uppercase()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey | Self::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) | Self::QueueAccessDenied(_) => StatusCode::FORBIDDEN,
            Self::QueueNotFound(_)
            | Self::JobNotFound(_)
            | Self::SubscriptionNotFound(_)
            | Self::ScheduleNotFound(_)
            | Self::ApplicationNotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingData(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Action { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn hints(&self) -> Vec<&'static str> {
        match self {
            Self::MissingApiKey => vec!["Provide your API key in the x-api-key header"],
            Self::InvalidApiKey => vec!["Check the key against the one issued at application creation"],
            Self::Unauthorized(_) => vec!["Authenticate with a key that owns this resource"],
            Self::Forbidden(_) => vec!["This operation requires the master API key"],
            Self::QueueAccessDenied(_) => {
                vec!["Ask an administrator to add the queue to your application's allowedQueues"]
            }
            Self::QueueNotFound(_) => vec!["Queues are created on first job submission"],
            Self::JobNotFound(_) => {
                vec!["Terminal jobs are trimmed by the retention policy and may no longer exist"]
            }
            Self::SubscriptionNotFound(_) | Self::ScheduleNotFound(_)
            | Self::ApplicationNotFound(_) => vec!["List the collection to discover valid ids"],
            Self::MissingData(_) => vec!["Include the required field in the request body"],
            Self::Validation(_) => vec!["Correct the highlighted field and retry"],
            Self::RateLimitExceeded => vec!["Back off and retry after the rate window"],
            Self::Action { .. } => vec!["Retry; if the failure persists check service health"],
        }
    }

    fn possible_causes(&self) -> Vec<&'static str> {
        match self {
            Self::MissingApiKey => vec!["The x-api-key header was omitted"],
            Self::InvalidApiKey => vec!["The key was revoked", "The key was mistyped"],
            Self::Unauthorized(_) => vec!["The job belongs to a different application"],
            Self::Forbidden(_) => vec!["A non-master key was used for an administrative operation"],
            Self::QueueAccessDenied(_) => {
                vec!["The queue is not listed in the application's allowedQueues"]
            }
            Self::QueueNotFound(_) => vec!["No job was ever submitted to this queue"],
            Self::JobNotFound(_) => vec!["The job id is wrong", "The job was cleaned by retention"],
            Self::SubscriptionNotFound(_) => vec!["The subscription was deleted"],
            Self::ScheduleNotFound(_) => vec!["The schedule was deleted"],
            Self::ApplicationNotFound(_) => vec!["The application was deleted"],
            Self::MissingData(_) => vec!["The request body is empty or missing fields"],
            Self::Validation(_) => vec!["A field value is out of range or malformed"],
            Self::RateLimitExceeded => vec!["Too many requests from this client in the window"],
            Self::Action { .. } => vec!["A backing store or downstream service failed"],
        }
    }

    fn suggested_fixes(&self) -> Vec<&'static str> {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey => {
                vec!["Set x-api-key to a valid application key"]
            }
            Self::Unauthorized(_) | Self::Forbidden(_) => {
                vec!["Use the owning application's key or the master key"]
            }
            Self::QueueAccessDenied(_) => vec!["Update the application settings via the master key"],
            Self::QueueNotFound(_) => vec!["Submit a job to create the queue implicitly"],
            Self::JobNotFound(_) => vec!["Submit the job again if it was trimmed"],
            Self::SubscriptionNotFound(_) => vec!["Recreate the subscription"],
            Self::ScheduleNotFound(_) => vec!["Recreate the schedule"],
            Self::ApplicationNotFound(_) => vec!["Create the application via the master key"],
            Self::MissingData(_) | Self::Validation(_) => {
                vec!["Consult GET /api/explain for the expected request shape"]
            }
            Self::RateLimitExceeded => vec!["Retry with exponential backoff"],
            Self::Action { .. } => vec!["Check GET /health and retry"],
        }
    }

    /// Structured error object for the response envelope.
    pub fn to_error_object(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "hints": self.hints(),
            "possibleCauses": self.possible_causes(),
            "suggestedFixes": self.suggested_fixes(),
        })
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let request_id = RequestId::generate();
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = %self.code(), error = %self, "request failed");
        }
        (status, failure(self.to_error_object(), &request_id)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ServiceError::MissingApiKey.code(), "MISSING_API_KEY");
        assert_eq!(ServiceError::InvalidApiKey.code(), "INVALID_API_KEY");
        assert_eq!(
            ServiceError::QueueAccessDenied("payments".to_string()).code(),
            "QUEUE_ACCESS_DENIED"
        );
        assert_eq!(
            ServiceError::Validation("bad".to_string()).code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn action_errors_are_qualified() {
        let err = ServiceError::action("enqueue", anyhow::anyhow!("redis down"));
        assert_eq!(err.code(), "ENQUEUE_ERROR");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(ServiceError::MissingApiKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ServiceError::QueueAccessDenied("q".to_string()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::JobNotFound("j".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn error_object_carries_recovery_fields() {
        let obj = ServiceError::QueueAccessDenied("payments".to_string()).to_error_object();
        assert_eq!(obj["code"], "QUEUE_ACCESS_DENIED");
        assert!(obj["hints"].as_array().is_some_and(|h| !h.is_empty()));
        assert!(obj["possibleCauses"].as_array().is_some_and(|c| !c.is_empty()));
        assert!(obj["suggestedFixes"].as_array().is_some_and(|f| !f.is_empty()));
    }
}
