//! AI-processing handler.
//!
//! Validates the request envelope; the model call itself is an opaque
//! collaborator behind this boundary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::kernel::jobs::{HandlerFailure, Job, JobContext, JobHandler};

const SUPPORTED_KINDS: &[&str] = &["completion", "embedding", "moderation", "image-generation"];

#[derive(Debug, Deserialize)]
struct AiRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Default)]
pub struct AiProcessingHandler;

impl AiProcessingHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for AiProcessingHandler {
    fn name(&self) -> &'static str {
        "ai-processing"
    }

    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<Value, HandlerFailure> {
        let request: AiRequest = serde_json::from_value(job.data.clone())
            .map_err(|e| HandlerFailure::non_retryable(format!("invalid ai payload: {}", e)))?;

        if !SUPPORTED_KINDS.contains(&request.kind.as_str()) {
            return Err(HandlerFailure::non_retryable(format!(
                "unsupported ai processing type '{}'",
                request.kind
            )));
        }
        if request.prompt.is_none() && request.input.is_none() {
            return Err(HandlerFailure::non_retryable(
                "one of 'prompt' or 'input' is required",
            ));
        }

        ctx.update_progress(job, json!(50)).await.ok();

        Ok(json!({
            "success": true,
            "type": request.kind,
            "model": request.model,
            "accepted": true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_parse() {
        for kind in SUPPORTED_KINDS {
            let request: AiRequest =
                serde_json::from_value(json!({"type": kind, "prompt": "hello"})).unwrap();
            assert_eq!(&request.kind, kind);
        }
    }

    #[test]
    fn unknown_kind_is_detected() {
        let request: AiRequest =
            serde_json::from_value(json!({"type": "telepathy", "prompt": "x"})).unwrap();
        assert!(!SUPPORTED_KINDS.contains(&request.kind.as_str()));
    }
}
