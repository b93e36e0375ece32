//! Durable job queue
//!
//! Redis-backed work queue for `discover-contract`, `sync-contract` and
//! `aggregate-metrics` jobs. Job ids are idempotency keys: a new job with an
//! existing id is rejected while the prior job is still waiting, delayed or
//! active, and replaces it once that job reached a terminal state. This is
//! what enforces at-most-one in-flight work per contract.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const KIND_DISCOVER: &str = "discover-contract";
pub const KIND_SYNC: &str = "sync-contract";
pub const KIND_AGGREGATE: &str = "aggregate-metrics";

/// Retry policy: attempts beyond the first are delayed exponentially
pub const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_SECS: u64 = 5;

/// Per-kind execution deadlines; discovery can binary-search deep history
/// and a cold sync may back-fill years of blocks.
const DISCOVER_TIMEOUT_SECS: u64 = 2 * 3600;
const SYNC_TIMEOUT_SECS: u64 = 24 * 3600;
const AGGREGATE_TIMEOUT_SECS: u64 = 3600;

const KEY_JOBS: &str = "queue:jobs";
const KEY_WAITING: &str = "queue:waiting";
const KEY_ACTIVE: &str = "queue:active";
const KEY_DELAYED: &str = "queue:delayed";
const KEY_PAUSED: &str = "queue:paused";

pub mod state {
    pub const WAITING: &str = "waiting";
    pub const DELAYED: &str = "delayed";
    pub const ACTIVE: &str = "active";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug)]
pub enum QueueError {
    Redis(String),
    Serialization(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Redis(msg) => write!(f, "Queue Redis error: {}", msg),
            QueueError::Serialization(msg) => write!(f, "Queue serialization error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Redis(e.to_string())
    }
}

/// Wire payload: `{"contractId": "<uuid>"}` for discover/sync, `{}` for
/// aggregate sweeps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobPayload {
    #[serde(rename = "contractId", skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: JobPayload,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: String,
    pub last_error: Option<String>,
}

impl Job {
    /// Execution deadline for this job kind.
    pub fn timeout(&self) -> Duration {
        let secs = match self.kind.as_str() {
            KIND_DISCOVER => DISCOVER_TIMEOUT_SECS,
            KIND_SYNC => SYNC_TIMEOUT_SECS,
            _ => AGGREGATE_TIMEOUT_SECS,
        };
        Duration::from_secs(secs)
    }
}

/// Idempotency key for a job: `discover-<uuid>` / `sync-<uuid>` / `aggregate`.
pub fn job_id(kind: &str, contract_id: Option<Uuid>) -> String {
    match (kind, contract_id) {
        (KIND_DISCOVER, Some(id)) => format!("discover-{}", id),
        (KIND_SYNC, Some(id)) => format!("sync-{}", id),
        _ => "aggregate".to_string(),
    }
}

/// Delay before retry attempt `attempts` (1-based), exponential from 5 s.
pub fn retry_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(10);
    Duration::from_secs(RETRY_BASE_DELAY_SECS * (1u64 << exp))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct JobQueue {
    redis: ConnectionManager,
}

impl JobQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Enqueue a job unless one with the same id is still in flight.
    /// Returns whether the job was accepted.
    pub async fn enqueue(
        &self,
        kind: &str,
        contract_id: Option<Uuid>,
    ) -> Result<bool, QueueError> {
        let id = job_id(kind, contract_id);
        let mut conn = self.redis.clone();

        if let Some(existing) = self.load_job(&id).await? {
            match existing.state.as_str() {
                state::WAITING | state::DELAYED | state::ACTIVE => return Ok(false),
                _ => {
                    // Terminal: the new job replaces it
                    let _: () = conn.lrem(KEY_WAITING, 0, &id).await?;
                    let _: () = conn.zrem(KEY_DELAYED, &id).await?;
                }
            }
        }

        let job = Job {
            id: id.clone(),
            kind: kind.to_string(),
            payload: JobPayload { contract_id },
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            state: state::WAITING.to_string(),
            last_error: None,
        };
        self.store_job(&job).await?;
        let _: () = conn.lpush(KEY_WAITING, &id).await?;
        Ok(true)
    }

    /// Whether a non-terminal job exists for this id.
    pub async fn is_in_flight(&self, id: &str) -> Result<bool, QueueError> {
        Ok(matches!(
            self.load_job(id).await?.map(|j| j.state),
            Some(s) if s == state::WAITING || s == state::DELAYED || s == state::ACTIVE
        ))
    }

    /// Pop the next runnable job, promoting due delayed jobs first.
    /// Returns None when paused or empty.
    pub async fn next_job(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.redis.clone();

        let paused: bool = conn.exists(KEY_PAUSED).await?;
        if paused {
            return Ok(None);
        }

        self.promote_due_jobs().await?;

        let id: Option<String> = conn
            .lmove(
                KEY_WAITING,
                KEY_ACTIVE,
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await?;

        let Some(id) = id else { return Ok(None) };

        match self.load_job(&id).await? {
            Some(mut job) => {
                job.state = state::ACTIVE.to_string();
                job.attempts += 1;
                self.store_job(&job).await?;
                Ok(Some(job))
            }
            None => {
                // Orphaned id without a record; drop it
                warn!(job_id = %id, "Dropping orphaned queue entry");
                let _: () = conn.lrem(KEY_ACTIVE, 0, &id).await?;
                Ok(None)
            }
        }
    }

    pub async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut done = job.clone();
        done.state = state::COMPLETED.to_string();
        done.last_error = None;
        self.store_job(&done).await?;
        let _: () = conn.lrem(KEY_ACTIVE, 0, &job.id).await?;
        Ok(())
    }

    /// Record a failure; schedule a delayed retry while attempts remain.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut failed = job.clone();
        failed.last_error = Some(error.to_string());

        let _: () = conn.lrem(KEY_ACTIVE, 0, &job.id).await?;

        if failed.attempts < failed.max_attempts {
            let delay = retry_delay(failed.attempts);
            failed.state = state::DELAYED.to_string();
            self.store_job(&failed).await?;
            let ready_at = now_ms() + delay.as_millis() as u64;
            let _: () = conn.zadd(KEY_DELAYED, &job.id, ready_at).await?;
            info!(
                job_id = %job.id,
                attempt = failed.attempts,
                delay_secs = delay.as_secs(),
                "Job failed, retry scheduled"
            );
        } else {
            failed.state = state::FAILED.to_string();
            self.store_job(&failed).await?;
            warn!(job_id = %job.id, error = %error, "Job failed terminally");
        }
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(KEY_PAUSED, 1).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(KEY_PAUSED).await?;
        Ok(())
    }

    /// Startup reconciliation: jobs still marked active belong to a crashed
    /// run and are forced to failed; waiting and delayed jobs are retained.
    pub async fn reconcile_on_start(&self) -> Result<(), QueueError> {
        self.pause().await?;
        let mut conn = self.redis.clone();

        let active_ids: Vec<String> = conn.lrange(KEY_ACTIVE, 0, -1).await?;
        for id in &active_ids {
            if let Some(mut job) = self.load_job(id).await? {
                job.state = state::FAILED.to_string();
                job.last_error = Some("stuck from previous run".to_string());
                self.store_job(&job).await?;
            }
            let _: () = conn.lrem(KEY_ACTIVE, 0, id).await?;
        }
        if !active_ids.is_empty() {
            warn!(
                count = active_ids.len(),
                "Failed jobs stuck from a previous run"
            );
        }

        self.resume().await?;
        Ok(())
    }

    /// Pause and leave durable state in place for the next run.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.pause().await?;
        info!("Job queue paused and closed");
        Ok(())
    }

    async fn promote_due_jobs(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(KEY_DELAYED, 0f64, now_ms() as f64, 0, 100)
            .await?;
        for id in due {
            let removed: i64 = conn.zrem(KEY_DELAYED, &id).await?;
            if removed == 0 {
                continue;
            }
            if let Some(mut job) = self.load_job(&id).await? {
                job.state = state::WAITING.to_string();
                self.store_job(&job).await?;
                let _: () = conn.lpush(KEY_WAITING, &id).await?;
            }
        }
        Ok(())
    }

    async fn load_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.hget(KEY_JOBS, id).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| QueueError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn store_job(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let json =
            serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: () = conn.hset(KEY_JOBS, &job.id, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_format() {
        let id = Uuid::nil();
        assert_eq!(
            job_id(KIND_DISCOVER, Some(id)),
            format!("discover-{}", id)
        );
        assert_eq!(job_id(KIND_SYNC, Some(id)), format!("sync-{}", id));
        assert_eq!(job_id(KIND_AGGREGATE, None), "aggregate");
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(1), Duration::from_secs(5));
        assert_eq!(retry_delay(2), Duration::from_secs(10));
        assert_eq!(retry_delay(3), Duration::from_secs(20));
    }

    #[test]
    fn test_job_timeouts_per_kind() {
        let mut job = Job {
            id: "sync-x".into(),
            kind: KIND_SYNC.into(),
            payload: JobPayload::default(),
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            state: state::WAITING.into(),
            last_error: None,
        };
        assert_eq!(job.timeout(), Duration::from_secs(24 * 3600));
        job.kind = KIND_DISCOVER.into();
        assert_eq!(job.timeout(), Duration::from_secs(2 * 3600));
        job.kind = KIND_AGGREGATE.into();
        assert_eq!(job.timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_payload_wire_format() {
        let id = Uuid::nil();
        let json = serde_json::to_string(&JobPayload {
            contract_id: Some(id),
        })
        .unwrap();
        assert_eq!(json, format!("{{\"contractId\":\"{}\"}}", id));
        let empty = serde_json::to_string(&JobPayload::default()).unwrap();
        assert_eq!(empty, "{}");
    }
}
