//! Placeholder handlers for the opaque job families.
//!
//! These queues exist so tenants can submit and track such jobs; the real
//! executors are external collaborators that pick work up through the
//! tracker API. The placeholder accepts the job and records it as handed
//! off.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kernel::jobs::{HandlerFailure, Job, JobContext, JobHandler};

/// Queues served by the placeholder.
pub const PLACEHOLDER_FAMILIES: &[&str] = &[
    "image-processing",
    "pdf-generation",
    "data-export",
    "notifications",
    "social-media",
    "web-scraping",
];

pub struct PlaceholderHandler {
    family: &'static str,
}

impl PlaceholderHandler {
    pub fn new(family: &'static str) -> Self {
        Self { family }
    }
}

#[async_trait]
impl JobHandler for PlaceholderHandler {
    fn name(&self) -> &'static str {
        self.family
    }

    async fn run(&self, job: &Job, _ctx: &JobContext) -> Result<Value, HandlerFailure> {
        if job.data.is_null() {
            return Err(HandlerFailure::non_retryable("job data is required"));
        }
        tracing::debug!(job_id = %job.job_id, family = self.family, "job accepted");
        Ok(json!({ "success": true, "handler": self.family, "accepted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_is_distinct() {
        let mut families = PLACEHOLDER_FAMILIES.to_vec();
        families.sort_unstable();
        families.dedup();
        assert_eq!(families.len(), PLACEHOLDER_FAMILIES.len());
    }
}
