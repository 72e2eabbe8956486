//! Subscription CRUD and the test-delivery operation.

use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::jobs::EventKind;
use crate::kernel::subscriptions::{
    validate_endpoint, DeliveryMethod, RetryConfig, Subscription, SubscriptionFilters,
};
use crate::kernel::{Identity, ServiceDeps};

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub method: DeliveryMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub filters: SubscriptionFilters,
    pub events: Vec<EventKind>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<DeliveryMethod>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub filters: Option<SubscriptionFilters>,
    #[serde(default)]
    pub events: Option<Vec<EventKind>>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
}

async fn load_owned(
    deps: &ServiceDeps,
    identity: &Identity,
    id: &str,
) -> Result<Subscription, ServiceError> {
    let subscription = deps
        .subscriptions
        .get(id)
        .await
        .map_err(|e| ServiceError::action("get_subscription", e))?
        .ok_or_else(|| ServiceError::SubscriptionNotFound(id.to_string()))?;

    if !identity.is_master && subscription.application_id != identity.application_id {
        return Err(ServiceError::Unauthorized(
            "subscription belongs to another application".to_string(),
        ));
    }
    Ok(subscription)
}

pub async fn create_subscription(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let subscription = Subscription::create(
        identity.application_id.clone(),
        body.name,
        body.endpoint,
        body.method,
        body.headers,
        body.filters,
        body.events,
        body.retry_config.unwrap_or_default(),
    )?;

    deps.subscriptions
        .insert(&subscription)
        .await
        .map_err(|e| ServiceError::action("create_subscription", e))?;
    Ok(success(subscription, &request_id))
}

pub async fn list_subscriptions(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
) -> Result<impl IntoResponse, ServiceError> {
    let subscriptions = if identity.is_master {
        deps.subscriptions.list_all().await
    } else {
        deps.subscriptions
            .list_for_application(&identity.application_id)
            .await
    }
    .map_err(|e| ServiceError::action("list_subscriptions", e))?;

    Ok(success(
        json!({ "subscriptions": subscriptions }),
        &request_id,
    ))
}

pub async fn get_subscription(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let subscription = load_owned(&deps, &identity, &id).await?;
    Ok(success(subscription, &request_id))
}

pub async fn update_subscription(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let mut subscription = load_owned(&deps, &identity, &id).await?;

    if let Some(endpoint) = body.endpoint {
        validate_endpoint(&endpoint)?;
        subscription.endpoint = endpoint;
    }
    if let Some(name) = body.name {
        subscription.name = name;
    }
    if let Some(method) = body.method {
        subscription.method = method;
    }
    if let Some(headers) = body.headers {
        subscription.headers = headers;
    }
    if let Some(filters) = body.filters {
        subscription.filters = filters;
    }
    if let Some(events) = body.events {
        if events.is_empty() {
            return Err(ServiceError::Validation(
                "subscription must list at least one event".to_string(),
            ));
        }
        subscription.events = events;
    }
    if let Some(active) = body.active {
        subscription.active = active;
    }
    if let Some(retry_config) = body.retry_config {
        if retry_config.max_attempts == 0 {
            return Err(ServiceError::Validation(
                "retryConfig.maxAttempts must be at least 1".to_string(),
            ));
        }
        subscription.retry_config = retry_config;
    }
    subscription.updated_at = chrono::Utc::now();

    deps.subscriptions
        .replace(&subscription)
        .await
        .map_err(|e| ServiceError::action("update_subscription", e))?;
    Ok(success(subscription, &request_id))
}

pub async fn delete_subscription(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    load_owned(&deps, &identity, &id).await?;
    deps.subscriptions
        .delete(&id)
        .await
        .map_err(|e| ServiceError::action("delete_subscription", e))?;
    Ok(success(json!({ "id": id, "deleted": true }), &request_id))
}

/// Synthesize a test event and run one delivery attempt; counters are not
/// touched.
pub async fn test_subscription(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let subscription = load_owned(&deps, &identity, &id).await?;
    let outcome = deps.fanout.deliver_test(&subscription).await;
    Ok(success(
        json!({ "subscriptionId": id, "delivery": outcome }),
        &request_id,
    ))
}
