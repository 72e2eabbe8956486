//! Webhook handler: performs the HTTP request described by the job payload.
//!
//! Retry semantics: network errors and HTTP >= 500 are retryable failures;
//! HTTP 4xx is a non-retriable final result (`success: false`) — the job
//! completes carrying the status for the submitter to inspect.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::kernel::jobs::{HandlerFailure, Job, JobContext, JobHandler};

const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Deserialize)]
struct WebhookRequest {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct WebhookHandler {
    http: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<Value, HandlerFailure> {
        let request: WebhookRequest = serde_json::from_value(job.data.clone())
            .map_err(|e| HandlerFailure::non_retryable(format!("invalid webhook payload: {}", e)))?;

        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                HandlerFailure::non_retryable(format!("unsupported method '{}'", request.method))
            })?;
        let timeout = Duration::from_millis(
            request
                .timeout_ms
                .unwrap_or(DEFAULT_TIMEOUT_MS)
                .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
        );

        let mut builder = self
            .http
            .request(method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }

        ctx.update_progress(job, json!(10)).await.ok();

        let response = builder.send().await.map_err(|e| {
            HandlerFailure::retryable(format!("request to {} failed: {}", request.url, e))
        })?;

        let status = response.status().as_u16();
        let body: Value = match response.text().await {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(_) => Value::Null,
        };

        if status >= 500 {
            return Err(HandlerFailure::retryable(format!(
                "endpoint returned HTTP {}",
                status
            )));
        }
        if status >= 400 {
            // Client errors are final: no retry, the result records the
            // rejection.
            return Ok(json!({ "success": false, "status": status, "data": body }));
        }

        Ok(json!({ "success": true, "status": status, "data": body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults_to_post() {
        let request: WebhookRequest =
            serde_json::from_value(json!({"url": "http://sink.internal/x"})).unwrap();
        assert_eq!(request.method, "POST");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn missing_url_is_rejected() {
        let result: Result<WebhookRequest, _> = serde_json::from_value(json!({"method": "GET"}));
        assert!(result.is_err());
    }

    #[test]
    fn timeout_is_clamped() {
        for (input, expected) in [(None, 30_000), (Some(10), 1_000), (Some(9_999_999), 300_000)] {
            let clamped = input
                .unwrap_or(DEFAULT_TIMEOUT_MS)
                .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
            assert_eq!(clamped, expected);
        }
    }
}
