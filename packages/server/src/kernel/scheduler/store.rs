//! Schedule persistence.
//!
//! Timestamps persist in the models' serde form, so every update built
//! with `doc!` encodes values through `bson::to_bson` to match. Fire-time
//! advancement is a conditional `find_one_and_update` keyed on the prior
//! `next_execution_at`, so concurrent instances cannot fire the same
//! schedule twice.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

use super::model::{ExecutionStatus, Schedule};
use crate::kernel::documents::SCHEDULES_COLLECTION;

pub struct ScheduleStore {
    collection: Collection<Schedule>,
}

impl ScheduleStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection(SCHEDULES_COLLECTION),
        }
    }

    pub async fn insert(&self, schedule: &Schedule) -> Result<()> {
        self.collection
            .insert_one(schedule)
            .await
            .context("failed to insert schedule")?;
        tracing::info!(
            schedule_id = %schedule.schedule_id,
            name = %schedule.name,
            "schedule created"
        );
        Ok(())
    }

    pub async fn get(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        self.collection
            .find_one(doc! { "_id": schedule_id })
            .await
            .context("failed to load schedule")
    }

    pub async fn list(&self) -> Result<Vec<Schedule>> {
        self.collection
            .find(doc! {})
            .await
            .context("failed to list schedules")?
            .try_collect()
            .await
            .context("failed to read schedules cursor")
    }

    pub async fn replace(&self, schedule: &Schedule) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &schedule.schedule_id }, schedule)
            .await
            .context("failed to update schedule")?;
        Ok(())
    }

    pub async fn delete(&self, schedule_id: &str) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "_id": schedule_id })
            .await
            .context("failed to delete schedule")?;
        Ok(result.deleted_count > 0)
    }

    /// Flip `enabled`; returns the updated record.
    pub async fn toggle(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        let Some(mut schedule) = self.get(schedule_id).await? else {
            return Ok(None);
        };
        schedule.enabled = !schedule.enabled;
        schedule.updated_at = Utc::now();
        self.replace(&schedule).await?;
        Ok(Some(schedule))
    }

    /// Enabled schedules whose fire time has arrived. The candidate set is
    /// narrowed server-side to enabled schedules with a fire time; the
    /// due comparison and the end-date/limit bounds run on the typed
    /// records (the internal surface keeps this collection small).
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let candidates: Vec<Schedule> = self
            .collection
            .find(doc! {
                "enabled": true,
                "next_execution_at": { "$ne": null },
            })
            .await
            .context("failed to query due schedules")?
            .try_collect()
            .await
            .context("failed to read due schedules cursor")?;

        Ok(candidates
            .into_iter()
            .filter(|schedule| {
                schedule
                    .next_execution_at
                    .is_some_and(|next| next <= now)
            })
            .collect())
    }

    /// Claim one fire: advance `next_execution_at` from its prior value to
    /// `next` (cron), or disable the schedule (one-shot). Returns false
    /// when another instance already claimed this fire.
    pub async fn claim_fire(
        &self,
        schedule: &Schedule,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let Some(prior) = schedule.next_execution_at else {
            return Ok(false);
        };

        let prior = bson::to_bson(&prior).context("failed to encode prior fire time")?;
        let now = bson::to_bson(&Utc::now()).context("failed to encode timestamp")?;
        let filter = doc! {
            "_id": &schedule.schedule_id,
            "enabled": true,
            "next_execution_at": prior,
        };
        let update = match next {
            Some(next) => {
                let next = bson::to_bson(&next).context("failed to encode next fire time")?;
                doc! {
                    "$set": { "next_execution_at": next, "updated_at": now }
                }
            }
            None => doc! {
                "$set": { "enabled": false, "updated_at": now },
                "$unset": { "next_execution_at": "" },
            },
        };

        let claimed = self
            .collection
            .find_one_and_update(filter, update)
            .await
            .context("failed to advance schedule fire time")?;
        Ok(claimed.is_some())
    }

    /// Record one execution outcome on the schedule.
    pub async fn record_execution(
        &self,
        schedule_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let now = bson::to_bson(&Utc::now()).context("failed to encode timestamp")?;
        let status = bson::to_bson(&status).context("failed to encode status")?;
        let mut set = doc! {
            "last_executed_at": now.clone(),
            "last_execution_status": status,
            "updated_at": now,
        };
        let update = match error {
            Some(error) => {
                set.insert("last_execution_error", error);
                doc! { "$set": set, "$inc": { "execution_count": 1 } }
            }
            None => doc! {
                "$set": set,
                "$unset": { "last_execution_error": "" },
                "$inc": { "execution_count": 1 },
            },
        };

        self.collection
            .update_one(doc! { "_id": schedule_id }, update)
            .await
            .context("failed to record schedule execution")?;
        Ok(())
    }
}
