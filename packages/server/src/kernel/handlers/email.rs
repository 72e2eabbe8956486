//! Email handler.
//!
//! Validates the message fields; the provider call itself is opaque to the
//! queue core and stands behind this boundary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::kernel::jobs::{HandlerFailure, Job, JobContext, JobHandler};

#[derive(Debug, Deserialize)]
struct EmailRequest {
    to: String,
    subject: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html: Option<String>,
}

impl EmailRequest {
    fn validate(&self) -> Result<(), String> {
        if self.to.trim().is_empty() || !self.to.contains('@') {
            return Err(format!("invalid recipient '{}'", self.to));
        }
        if self.subject.trim().is_empty() {
            return Err("subject is required".to_string());
        }
        if self.body.is_none() && self.html.is_none() {
            return Err("one of 'body' or 'html' is required".to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct EmailHandler;

impl EmailHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn run(&self, job: &Job, _ctx: &JobContext) -> Result<Value, HandlerFailure> {
        let request: EmailRequest = serde_json::from_value(job.data.clone())
            .map_err(|e| HandlerFailure::non_retryable(format!("invalid email payload: {}", e)))?;
        request
            .validate()
            .map_err(HandlerFailure::non_retryable)?;

        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        tracing::debug!(job_id = %job.job_id, to = %request.to, message_id = %message_id, "email dispatched");

        Ok(json!({
            "success": true,
            "messageId": message_id,
            "to": request.to,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: Value) -> Result<EmailRequest, String> {
        let request: EmailRequest =
            serde_json::from_value(value).map_err(|e| e.to_string())?;
        request.validate()?;
        Ok(request)
    }

    #[test]
    fn valid_message_passes() {
        assert!(request(json!({"to": "u@x", "subject": "hi", "body": "hello"})).is_ok());
        assert!(request(json!({"to": "u@x", "subject": "hi", "html": "<b>hello</b>"})).is_ok());
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        assert!(request(json!({"to": "nope", "subject": "hi", "body": "x"})).is_err());
        assert!(request(json!({"to": "", "subject": "hi", "body": "x"})).is_err());
    }

    #[test]
    fn body_or_html_is_required() {
        assert!(request(json!({"to": "u@x", "subject": "hi"})).is_err());
    }

    #[test]
    fn empty_subject_is_rejected() {
        assert!(request(json!({"to": "u@x", "subject": " ", "body": "x"})).is_err());
    }
}
