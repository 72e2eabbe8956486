//! Subscription persistence.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

use super::model::Subscription;
use crate::kernel::documents::SUBSCRIPTIONS_COLLECTION;

pub struct SubscriptionStore {
    collection: Collection<Subscription>,
}

impl SubscriptionStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection(SUBSCRIPTIONS_COLLECTION),
        }
    }

    pub async fn insert(&self, subscription: &Subscription) -> Result<()> {
        self.collection
            .insert_one(subscription)
            .await
            .context("failed to insert subscription")?;
        tracing::info!(
            subscription_id = %subscription.id,
            application_id = %subscription.application_id,
            "subscription created"
        );
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        self.collection
            .find_one(doc! { "_id": id })
            .await
            .context("failed to load subscription")
    }

    pub async fn list_for_application(&self, application_id: &str) -> Result<Vec<Subscription>> {
        self.collection
            .find(doc! { "application_id": application_id })
            .await
            .context("failed to list subscriptions")?
            .try_collect()
            .await
            .context("failed to read subscriptions cursor")
    }

    pub async fn list_all(&self) -> Result<Vec<Subscription>> {
        self.collection
            .find(doc! {})
            .await
            .context("failed to list subscriptions")?
            .try_collect()
            .await
            .context("failed to read subscriptions cursor")
    }

    /// Active subscriptions for one application; the fanout evaluates the
    /// per-event filters on the typed records.
    pub async fn find_active_for_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<Subscription>> {
        self.collection
            .find(doc! { "application_id": application_id, "active": true })
            .await
            .context("failed to query active subscriptions")?
            .try_collect()
            .await
            .context("failed to read active subscriptions cursor")
    }

    pub async fn replace(&self, subscription: &Subscription) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &subscription.id }, subscription)
            .await
            .context("failed to update subscription")?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "_id": id })
            .await
            .context("failed to delete subscription")?;
        Ok(result.deleted_count > 0)
    }

    /// Record one successful delivery.
    pub async fn record_trigger(&self, id: &str) -> Result<()> {
        // Timestamps persist in the models' serde form (RFC 3339), so the
        // update must go through the same serializer.
        let now = bson::to_bson(&Utc::now()).context("failed to encode timestamp")?;
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$inc": { "trigger_count": 1 },
                    "$set": { "last_triggered_at": now },
                },
            )
            .await
            .context("failed to record subscription trigger")?;
        Ok(())
    }
}
