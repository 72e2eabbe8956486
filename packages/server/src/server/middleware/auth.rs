//! API-key authentication middleware.
//!
//! Resolves the `x-api-key` header through the tenant registry and inserts
//! the resulting [`Identity`] into request extensions. Failures short-
//! circuit with the structured error envelope.

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

use crate::kernel::ServiceDeps;

pub async fn api_key_auth(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    mut request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match deps.tenants.authenticate(key.as_deref()).await {
        Ok(identity) => {
            debug!(
                application_id = %identity.application_id,
                is_master = identity.is_master,
                "request authenticated"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}
