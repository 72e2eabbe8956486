//! Tenant registry: API-key authentication and application CRUD.
//!
//! Keys are generated server-side and returned exactly once at creation;
//! the store keeps only SHA-256 hashes, compared in constant time. A
//! process-wide cache keyed by key hash keeps the hot auth path off the
//! document store.

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::model::{Application, ApplicationSettings};
use crate::common::ServiceError;
use crate::config::Config;
use crate::kernel::documents::APPLICATIONS_COLLECTION;
use crate::kernel::jobs::Job;

/// Hash an API key for storage and lookup.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time byte comparison; never early-exits on a mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The caller identity resolved for a request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub application_id: String,
    pub application_name: String,
    pub is_master: bool,
    pub allowed_queues: Vec<String>,
}

impl Identity {
    /// The configured master identity: global queue rights plus
    /// administrative operations.
    pub fn master() -> Self {
        Self {
            application_id: "master".to_string(),
            application_name: "master".to_string(),
            is_master: true,
            allowed_queues: vec!["*".to_string()],
        }
    }

    fn for_application(app: &Application) -> Self {
        Self {
            application_id: app.id.clone(),
            application_name: app.name.clone(),
            is_master: false,
            allowed_queues: app.settings.allowed_queues.clone(),
        }
    }

    pub fn can_access_queue(&self, queue: &str) -> bool {
        self.is_master
            || self
                .allowed_queues
                .iter()
                .any(|pattern| super::model::queue_pattern_matches(pattern, queue))
    }

    /// Non-master callers may only touch jobs their application submitted.
    pub fn can_access_job(&self, job: &Job) -> bool {
        self.is_master || job.metadata.application_id == self.application_id
    }

    pub fn require_master(&self) -> Result<(), ServiceError> {
        if self.is_master {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "master API key required".to_string(),
            ))
        }
    }
}

/// Partial update applied by `PATCH /api/applications/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct ApplicationPatch {
    pub name: Option<String>,
    pub settings: Option<ApplicationSettings>,
}

pub struct TenantRegistry {
    collection: Collection<Application>,
    /// key hash → application, write-through on mutation.
    cache: DashMap<String, Application>,
    master_key_hash: String,
    auth_enabled: bool,
}

impl TenantRegistry {
    pub fn new(database: &Database, config: &Config) -> Self {
        Self {
            collection: database.collection(APPLICATIONS_COLLECTION),
            cache: DashMap::new(),
            master_key_hash: hash_api_key(&config.master_api_key),
            auth_enabled: config.auth_enabled,
        }
    }

    /// Resolve the identity for a request from its `x-api-key` header.
    pub async fn authenticate(&self, provided: Option<&str>) -> Result<Identity, ServiceError> {
        if !self.auth_enabled {
            return Ok(Identity::master());
        }

        let key = provided.ok_or(ServiceError::MissingApiKey)?;
        let hash = hash_api_key(key);

        if constant_time_eq(hash.as_bytes(), self.master_key_hash.as_bytes()) {
            return Ok(Identity::master());
        }

        if let Some(app) = self.cache.get(&hash) {
            return Ok(Identity::for_application(&app));
        }

        let found = self
            .collection
            .find_one(doc! { "api_key_hash": &hash })
            .await
            .map_err(|e| ServiceError::action("auth", e.into()))?;

        match found {
            Some(app) => {
                let identity = Identity::for_application(&app);
                self.cache.insert(hash, app);
                Ok(identity)
            }
            None => Err(ServiceError::InvalidApiKey),
        }
    }

    /// Create an application. Returns the record and the plaintext key —
    /// the only time the key is ever visible.
    pub async fn create_application(
        &self,
        name: String,
        settings: ApplicationSettings,
    ) -> Result<(Application, String)> {
        let api_key = format!(
            "jq_{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let app = Application::new(name, hash_api_key(&api_key), settings);

        self.collection
            .insert_one(&app)
            .await
            .context("failed to insert application")?;
        self.cache.insert(app.api_key_hash.clone(), app.clone());

        tracing::info!(application_id = %app.id, name = %app.name, "application created");
        Ok((app, api_key))
    }

    pub async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        let app = self
            .collection
            .find_one(doc! { "_id": id })
            .await
            .context("failed to load application")?;
        Ok(app)
    }

    pub async fn list_applications(&self) -> Result<Vec<Application>> {
        let apps: Vec<Application> = self
            .collection
            .find(doc! {})
            .await
            .context("failed to list applications")?
            .try_collect()
            .await
            .context("failed to read applications cursor")?;
        Ok(apps)
    }

    pub async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
    ) -> Result<Option<Application>> {
        let Some(mut app) = self.get_application(id).await? else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            app.name = name;
        }
        if let Some(settings) = patch.settings {
            app.settings = settings;
        }
        app.updated_at = chrono::Utc::now();

        self.collection
            .replace_one(doc! { "_id": id }, &app)
            .await
            .context("failed to update application")?;
        self.cache.insert(app.api_key_hash.clone(), app.clone());

        Ok(Some(app))
    }

    pub async fn delete_application(&self, id: &str) -> Result<bool> {
        let Some(app) = self.get_application(id).await? else {
            return Ok(false);
        };

        self.collection
            .delete_one(doc! { "_id": id })
            .await
            .context("failed to delete application")?;
        self.cache.remove(&app.api_key_hash);

        tracing::info!(application_id = %id, "application deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::{JobMetadata, JobOptions};
    use crate::kernel::jobs::{Job, JobStatus};

    #[test]
    fn hashing_is_deterministic_and_hex() {
        let a = hash_api_key("jq_abc");
        let b = hash_api_key("jq_abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_api_key("jq_abd"));
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"different"));
        assert!(!constant_time_eq(b"same", b"sama"));
    }

    #[test]
    fn master_identity_has_global_rights() {
        let master = Identity::master();
        assert!(master.is_master);
        assert!(master.can_access_queue("anything"));
        assert!(master.require_master().is_ok());
    }

    #[test]
    fn application_identity_is_scoped() {
        let identity = Identity {
            application_id: "app-1".to_string(),
            application_name: "test".to_string(),
            is_master: false,
            allowed_queues: vec!["email".to_string(), "webhook".to_string()],
        };
        assert!(identity.can_access_queue("email"));
        assert!(!identity.can_access_queue("payments"));
        assert!(identity.require_master().is_err());
    }

    #[test]
    fn job_ownership_is_enforced_for_non_master() {
        let identity = Identity {
            application_id: "app-1".to_string(),
            application_name: "test".to_string(),
            is_master: false,
            allowed_queues: vec!["*".to_string()],
        };

        let job = |application_id: &str| {
            Job::builder()
                .queue_name("email")
                .name("email")
                .metadata(JobMetadata {
                    application_id: application_id.to_string(),
                    application_name: "other".to_string(),
                    submitted_at: chrono::Utc::now(),
                    request_id: "r".to_string(),
                    extra: serde_json::Map::new(),
                })
                .options(JobOptions::default())
                .status(JobStatus::Waiting)
                .build()
        };

        assert!(identity.can_access_job(&job("app-1")));
        assert!(!identity.can_access_job(&job("app-2")));
        assert!(Identity::master().can_access_job(&job("app-2")));
    }
}
