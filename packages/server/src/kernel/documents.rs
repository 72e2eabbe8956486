//! Document store bootstrap.
//!
//! Applications, subscriptions and schedules are typed records persisted in
//! MongoDB collections. Each store module owns its collection handle; this
//! module only connects and hands out the database.

use anyhow::{Context, Result};
use mongodb::{Client, Database};

use crate::config::Config;

pub const APPLICATIONS_COLLECTION: &str = "applications";
pub const SUBSCRIPTIONS_COLLECTION: &str = "subscriptions";
pub const SCHEDULES_COLLECTION: &str = "schedules";

/// Connect to the document store and select the service database.
pub async fn connect(config: &Config) -> Result<Database> {
    let client = Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("failed to connect to document store")?;
    let database = client.database(&config.mongodb_database);

    tracing::info!(database = %config.mongodb_database, "document store connected");
    Ok(database)
}
