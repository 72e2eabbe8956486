//! Tenant (application) CRUD. Master identity only.

use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::common::{success, RequestId, ServiceError};
use crate::kernel::tenants::{Application, ApplicationPatch, ApplicationSettings};
use crate::kernel::{Identity, ServiceDeps};

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    #[serde(default)]
    pub settings: Option<ApplicationSettings>,
}

/// Applications as exposed by the API: key material never leaves the
/// creation response.
fn view(app: &Application) -> Value {
    json!({
        "id": app.id,
        "name": app.name,
        "settings": app.settings,
        "createdAt": app.created_at,
        "updatedAt": app.updated_at,
    })
}

pub async fn create_application(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    identity.require_master()?;
    if body.name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "application name is required".to_string(),
        ));
    }

    let (app, api_key) = deps
        .tenants
        .create_application(body.name, body.settings.unwrap_or_default())
        .await
        .map_err(|e| ServiceError::action("create_application", e))?;

    let mut payload = view(&app);
    // Returned exactly once; only the hash is stored.
    payload["apiKey"] = json!(api_key);
    Ok(success(payload, &request_id))
}

pub async fn list_applications(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
) -> Result<impl IntoResponse, ServiceError> {
    identity.require_master()?;
    let apps = deps
        .tenants
        .list_applications()
        .await
        .map_err(|e| ServiceError::action("list_applications", e))?;
    let views: Vec<Value> = apps.iter().map(view).collect();
    Ok(success(json!({ "applications": views }), &request_id))
}

pub async fn get_application(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    identity.require_master()?;
    let app = deps
        .tenants
        .get_application(&id)
        .await
        .map_err(|e| ServiceError::action("get_application", e))?
        .ok_or(ServiceError::ApplicationNotFound(id))?;
    Ok(success(view(&app), &request_id))
}

pub async fn update_application(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(patch): Json<ApplicationPatch>,
) -> Result<impl IntoResponse, ServiceError> {
    identity.require_master()?;
    let app = deps
        .tenants
        .update_application(&id, patch)
        .await
        .map_err(|e| ServiceError::action("update_application", e))?
        .ok_or(ServiceError::ApplicationNotFound(id))?;
    Ok(success(view(&app), &request_id))
}

pub async fn delete_application(
    Extension(deps): Extension<Arc<ServiceDeps>>,
    Extension(identity): Extension<Identity>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    identity.require_master()?;
    let deleted = deps
        .tenants
        .delete_application(&id)
        .await
        .map_err(|e| ServiceError::action("delete_application", e))?;
    if !deleted {
        return Err(ServiceError::ApplicationNotFound(id));
    }
    Ok(success(json!({ "id": id, "deleted": true }), &request_id))
}
