//! Tenant registry: applications, API keys, authorization.

pub mod model;
pub mod registry;

pub use model::{queue_pattern_matches, Application, ApplicationSettings};
pub use registry::{hash_api_key, ApplicationPatch, Identity, TenantRegistry};
