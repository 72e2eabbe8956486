//! KV-backed queue storage.
//!
//! All queue state lives in the Redis-compatible store:
//!
//! - `jobq:{queue}:waiting`   — zset, score = priority band + enqueue time
//! - `jobq:{queue}:delayed`   — zset, score = due time (epoch ms)
//! - `jobq:{queue}:active`    — zset, score = visibility deadline (epoch ms)
//! - `jobq:{queue}:completed` — zset, score = finish time (epoch ms)
//! - `jobq:{queue}:failed`    — zset, score = finish time (epoch ms)
//! - `jobq:{queue}:paused`    — flag key, consulted by reserve
//! - `jobq:job:{id}`          — serialized job document
//! - `jobq:queues`            — set of known queue names
//!
//! Multi-key transitions run as Lua scripts so each transition is a single
//! atomic round-trip; there are no application-level locks. A worker crash
//! leaves the job in `active` until its visibility deadline passes, after
//! which `reserve` reclaims it (at-least-once delivery).

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::Serialize;

use super::job::{Job, JobStatus, MAX_PRIORITY};
use crate::config::Config;

const QUEUES_KEY: &str = "jobq:queues";
const JOB_KEY_PREFIX: &str = "jobq:job:";

/// Width of one priority band in waiting-set scores. Within a band jobs
/// order by enqueue time (FIFO); higher priority lands in a lower band and
/// is popped first. Must match the literal in the Lua scripts below.
const PRIORITY_BAND: f64 = 1.0e13;

pub fn queue_key(queue: &str, suffix: &str) -> String {
    format!("jobq:{}:{}", queue, suffix)
}

pub fn job_key(job_id: &str) -> String {
    format!("{}{}", JOB_KEY_PREFIX, job_id)
}

/// Score for the waiting zset: priority-major, enqueue-time-minor.
pub fn waiting_score(priority: i64, now_ms: i64) -> f64 {
    let band = (MAX_PRIORITY - priority.clamp(0, MAX_PRIORITY)) as f64;
    band * PRIORITY_BAND + now_ms as f64
}

/// Atomically reserve one job: honor the pause flag, promote due delayed
/// jobs, reclaim expired active jobs, then pop the best waiting job into
/// the active set with a fresh visibility deadline.
const RESERVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return false
end
local function requeue(id, now)
  local priority = 0
  local doc = redis.call('GET', ARGV[3] .. id)
  if doc then
    local ok, job = pcall(cjson.decode, doc)
    if ok and job.options and job.options.priority then
      priority = tonumber(job.options.priority) or 0
    end
  end
  if priority < 0 then priority = 0 end
  if priority > 100 then priority = 100 end
  redis.call('ZADD', KEYS[3], (100 - priority) * 1e13 + now, id)
end
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  requeue(id, now)
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', now)
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[4], id)
  requeue(id, now)
end
local popped = redis.call('ZPOPMIN', KEYS[3], 1)
if #popped == 0 then
  return false
end
redis.call('ZADD', KEYS[4], tonumber(ARGV[2]), popped[1])
return popped[1]
"#;

/// Promote due delayed jobs into the waiting set. Same requeue logic as
/// reserve; used by the housekeeping sweep for queues nobody is polling.
const PROMOTE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  local priority = 0
  local doc = redis.call('GET', ARGV[2] .. id)
  if doc then
    local ok, job = pcall(cjson.decode, doc)
    if ok and job.options and job.options.priority then
      priority = tonumber(job.options.priority) or 0
    end
  end
  if priority < 0 then priority = 0 end
  if priority > 100 then priority = 100 end
  redis.call('ZADD', KEYS[2], (100 - priority) * 1e13 + now, id)
end
return #due
"#;

/// Move a job into a terminal bucket (clearing it from every pending
/// set: a tracker update may finish a job that was still waiting),
/// persist the final document, then trim the bucket to its age and count
/// bounds (deleting trimmed job documents).
const FINISH_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('SET', ARGV[6] .. ARGV[1], ARGV[3])
redis.call('ZADD', KEYS[4], tonumber(ARGV[2]), ARGV[1])
local cutoff = tonumber(ARGV[2]) - tonumber(ARGV[4])
local aged = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', cutoff)
for _, id in ipairs(aged) do
  redis.call('DEL', ARGV[6] .. id)
  redis.call('ZREM', KEYS[4], id)
end
local excess = redis.call('ZCARD', KEYS[4]) - tonumber(ARGV[5])
if excess > 0 then
  local oldest = redis.call('ZRANGE', KEYS[4], 0, excess - 1)
  for _, id in ipairs(oldest) do
    redis.call('DEL', ARGV[6] .. id)
  end
  redis.call('ZREMRANGEBYRANK', KEYS[4], 0, excess - 1)
end
return redis.status_reply('OK')
"#;

/// Park a failing job for retry: active → delayed at the backoff due time.
const RETRY_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('SET', ARGV[3] .. ARGV[1], ARGV[4])
redis.call('ZADD', KEYS[2], tonumber(ARGV[2]), ARGV[1])
return redis.status_reply('OK')
"#;

/// Remove a waiting or delayed job and its document (cancellation).
const REMOVE_SCRIPT: &str = r#"
local removed = redis.call('ZREM', KEYS[1], ARGV[1]) + redis.call('ZREM', KEYS[2], ARGV[1])
if removed > 0 then
  redis.call('DEL', ARGV[2] .. ARGV[1])
end
return removed
"#;

/// Trim a terminal bucket to an age bound, deleting job documents.
const CLEAN_SCRIPT: &str = r#"
local cutoff = tonumber(ARGV[1])
local aged = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', cutoff)
for _, id in ipairs(aged) do
  redis.call('DEL', ARGV[2] .. id)
  redis.call('ZREM', KEYS[1], id)
end
return #aged
"#;

/// Age and count bounds for the terminal buckets.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed_max_age_ms: u64,
    pub completed_max_count: u64,
    pub failed_max_age_ms: u64,
    pub failed_max_count: u64,
}

impl RetentionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            completed_max_age_ms: config.completed_retention_secs * 1_000,
            completed_max_count: config.completed_retention_count,
            failed_max_age_ms: config.failed_retention_secs * 1_000,
            failed_max_count: config.failed_retention_count,
        }
    }

    fn for_bucket(&self, bucket: TerminalBucket) -> (u64, u64) {
        match bucket {
            TerminalBucket::Completed => (self.completed_max_age_ms, self.completed_max_count),
            TerminalBucket::Failed => (self.failed_max_age_ms, self.failed_max_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalBucket {
    Completed,
    Failed,
}

impl TerminalBucket {
    pub fn suffix(&self) -> &'static str {
        match self {
            TerminalBucket::Completed => "completed",
            TerminalBucket::Failed => "failed",
        }
    }
}

/// Per-status counts for one queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}

/// KV-backed job storage. Cheap to clone; each clone shares the
/// multiplexed connection.
#[derive(Clone)]
pub struct JobStore {
    conn: ConnectionManager,
    retention: RetentionPolicy,
    reserve: Script,
    promote: Script,
    finish: Script,
    retry: Script,
    remove: Script,
    clean: Script,
}

impl JobStore {
    pub fn new(conn: ConnectionManager, retention: RetentionPolicy) -> Self {
        Self {
            conn,
            retention,
            reserve: Script::new(RESERVE_SCRIPT),
            promote: Script::new(PROMOTE_SCRIPT),
            finish: Script::new(FINISH_SCRIPT),
            retry: Script::new(RETRY_SCRIPT),
            remove: Script::new(REMOVE_SCRIPT),
            clean: Script::new(CLEAN_SCRIPT),
        }
    }

    /// Store a new job and place it in the waiting set, or the delayed set
    /// when it carries an enqueue delay.
    pub async fn push(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(job).context("failed to serialize job")?;
        let now_ms = Utc::now().timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(QUEUES_KEY, &job.queue_name)
            .ignore()
            .set(job_key(&job.job_id), doc)
            .ignore();

        if job.options.delay_ms > 0 {
            let due = now_ms + job.options.delay_ms as i64;
            pipe.zadd(
                queue_key(&job.queue_name, "delayed"),
                &job.job_id,
                due as f64,
            )
            .ignore();
        } else {
            pipe.zadd(
                queue_key(&job.queue_name, "waiting"),
                &job.job_id,
                waiting_score(job.options.clamped_priority(), now_ms),
            )
            .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Atomically reserve the next eligible job. Returns `None` when the
    /// queue is paused or empty.
    pub async fn reserve(&self, queue: &str, visibility_timeout_ms: u64) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let deadline_ms = now_ms + visibility_timeout_ms as i64;

        let job_id: Option<String> = self
            .reserve
            .key(queue_key(queue, "paused"))
            .key(queue_key(queue, "delayed"))
            .key(queue_key(queue, "waiting"))
            .key(queue_key(queue, "active"))
            .arg(now_ms)
            .arg(deadline_ms)
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        let Some(job_id) = job_id else {
            return Ok(None);
        };

        match self.get(&job_id).await? {
            Some(job) => Ok(Some(job)),
            None => {
                // Document trimmed underneath us; drop the orphaned id.
                let _: () = conn.zrem(queue_key(queue, "active"), &job_id).await?;
                Ok(None)
            }
        }
    }

    /// Promote due delayed jobs to waiting (housekeeping sweep).
    pub async fn promote_due(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let promoted: u64 = self
            .promote
            .key(queue_key(queue, "delayed"))
            .key(queue_key(queue, "waiting"))
            .arg(Utc::now().timestamp_millis())
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    /// Terminal transition into completed or failed, with retention trim.
    /// The job must already carry its terminal status and finish time.
    pub async fn finish(&self, job: &Job) -> Result<()> {
        let bucket = match job.status {
            JobStatus::Completed => TerminalBucket::Completed,
            JobStatus::Failed => TerminalBucket::Failed,
            other => anyhow::bail!("finish called on non-terminal status {:?}", other),
        };
        let (max_age_ms, max_count) = self.retention.for_bucket(bucket);
        let finished_ms = job
            .finished_at
            .unwrap_or_else(Utc::now)
            .timestamp_millis();
        let doc = serde_json::to_string(job).context("failed to serialize job")?;

        let mut conn = self.conn.clone();
        let _: () = self
            .finish
            .key(queue_key(&job.queue_name, "waiting"))
            .key(queue_key(&job.queue_name, "delayed"))
            .key(queue_key(&job.queue_name, "active"))
            .key(queue_key(&job.queue_name, bucket.suffix()))
            .arg(&job.job_id)
            .arg(finished_ms)
            .arg(doc)
            .arg(max_age_ms)
            .arg(max_count)
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Park an actively-failing job for a delayed retry.
    pub async fn retry_later(&self, job: &Job, due_ms: i64) -> Result<()> {
        let doc = serde_json::to_string(job).context("failed to serialize job")?;
        let mut conn = self.conn.clone();
        let _: () = self
            .retry
            .key(queue_key(&job.queue_name, "active"))
            .key(queue_key(&job.queue_name, "delayed"))
            .arg(&job.job_id)
            .arg(due_ms)
            .arg(JOB_KEY_PREFIX)
            .arg(doc)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Extend the visibility deadline of an active job (heartbeat).
    pub async fn heartbeat(&self, queue: &str, job_id: &str, visibility_timeout_ms: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let deadline = Utc::now().timestamp_millis() + visibility_timeout_ms as i64;
        // XX: only refresh jobs still in the active set.
        let _: () = redis::cmd("ZADD")
            .arg(queue_key(queue, "active"))
            .arg("XX")
            .arg(deadline)
            .arg(job_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Rewrite the job document in place (progress, attempt counters).
    pub async fn save_doc(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(job).context("failed to serialize job")?;
        let _: () = conn.set(job_key(&job.job_id), doc).await?;
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let doc: Option<String> = conn.get(job_key(job_id)).await?;
        match doc {
            Some(raw) => {
                let job = serde_json::from_str(&raw).context("corrupt job document")?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Remove a waiting or delayed job (cancellation). Returns whether
    /// anything was removed.
    pub async fn remove(&self, queue: &str, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .remove
            .key(queue_key(queue, "waiting"))
            .key(queue_key(queue, "delayed"))
            .arg(job_id)
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    pub async fn pause(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(queue_key(queue, "paused"), 1).await?;
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(queue_key(queue, "paused")).await?;
        Ok(())
    }

    pub async fn is_paused(&self, queue: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(queue_key(queue, "paused")).await?;
        Ok(exists)
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let (waiting, active, delayed, completed, failed, paused): (u64, u64, u64, u64, u64, bool) =
            redis::pipe()
                .zcard(queue_key(queue, "waiting"))
                .zcard(queue_key(queue, "active"))
                .zcard(queue_key(queue, "delayed"))
                .zcard(queue_key(queue, "completed"))
                .zcard(queue_key(queue, "failed"))
                .exists(queue_key(queue, "paused"))
                .query_async(&mut conn)
                .await?;

        Ok(QueueStats {
            waiting,
            active,
            delayed,
            completed,
            failed,
            paused,
        })
    }

    /// Trim a terminal bucket to `older_than_ms`. Returns removed count.
    pub async fn clean(
        &self,
        queue: &str,
        bucket: TerminalBucket,
        older_than_ms: u64,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let cutoff = Utc::now().timestamp_millis() - older_than_ms as i64;
        let removed: u64 = self
            .clean
            .key(queue_key(queue, bucket.suffix()))
            .arg(cutoff)
            .arg(JOB_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    /// All queue names ever seen by this store.
    pub async fn known_queues(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut queues: Vec<String> = conn.smembers(QUEUES_KEY).await?;
        queues.sort();
        Ok(queues)
    }

    /// Job ids currently in one status set of a queue, oldest first for
    /// pending sets and newest first for terminal buckets.
    pub async fn list_ids(&self, queue: &str, status: JobStatus, limit: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let stop = limit.max(1) - 1;
        let ids: Vec<String> = match status {
            JobStatus::Waiting | JobStatus::Paused => {
                conn.zrange(queue_key(queue, "waiting"), 0, stop).await?
            }
            JobStatus::Delayed => conn.zrange(queue_key(queue, "delayed"), 0, stop).await?,
            JobStatus::Active => conn.zrange(queue_key(queue, "active"), 0, stop).await?,
            JobStatus::Completed => {
                conn.zrevrange(queue_key(queue, "completed"), 0, stop).await?
            }
            JobStatus::Failed => conn.zrevrange(queue_key(queue, "failed"), 0, stop).await?,
        };
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_queue() {
        assert_eq!(queue_key("email", "waiting"), "jobq:email:waiting");
        assert_eq!(job_key("j-1"), "jobq:job:j-1");
    }

    #[test]
    fn higher_priority_scores_lower() {
        let now = 1_700_000_000_000;
        assert!(waiting_score(10, now) < waiting_score(0, now));
        assert!(waiting_score(100, now) < waiting_score(99, now));
    }

    #[test]
    fn equal_priority_orders_by_time() {
        let earlier = waiting_score(5, 1_700_000_000_000);
        let later = waiting_score(5, 1_700_000_000_500);
        assert!(earlier < later);
    }

    #[test]
    fn priority_bands_never_overlap_on_time() {
        // The newest possible low-priority job still scores above the
        // oldest high-priority job.
        let old_high = waiting_score(1, 0);
        let new_low = waiting_score(0, 9_999_999_999_999);
        assert!(old_high < new_low);
    }

    #[test]
    fn out_of_range_priorities_are_clamped() {
        let now = 1_700_000_000_000;
        assert_eq!(waiting_score(1_000, now), waiting_score(100, now));
        assert_eq!(waiting_score(-5, now), waiting_score(0, now));
    }

    #[test]
    fn retention_policy_reads_config_bounds() {
        let policy = RetentionPolicy {
            completed_max_age_ms: 3_600_000,
            completed_max_count: 1_000,
            failed_max_age_ms: 86_400_000,
            failed_max_count: 5_000,
        };
        assert_eq!(
            policy.for_bucket(TerminalBucket::Completed),
            (3_600_000, 1_000)
        );
        assert_eq!(policy.for_bucket(TerminalBucket::Failed), (86_400_000, 5_000));
    }
}
