//! The job queue contract shared by the Redis and in-memory stores.

use crate::error::QueueResult;
use crate::registry::QueueJob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A job as held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord<J> {
    /// Unique per enqueue; distinguishes a replaced record from its successor.
    pub id: Uuid,
    /// Dedup and cancellation handle.
    pub key: String,
    pub job: J,
    /// Earliest instant the job may be dequeued.
    pub fire_at: DateTime<Utc>,
    /// Attempts already made.
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl<J: QueueJob> JobRecord<J> {
    pub fn new(key: String, job: J, fire_at: DateTime<Utc>, now: DateTime<Utc>, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            job,
            fire_at,
            attempts: 0,
            max_attempts,
            enqueued_at: now,
            last_error: None,
        }
    }

    /// The record as it will be stored for the next attempt.
    pub fn next_attempt(&self, fire_at: DateTime<Utc>, error: &str) -> Self {
        Self {
            attempts: self.attempts + 1,
            fire_at,
            last_error: Some(error.to_string()),
            ..self.clone()
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }
}

/// Options for [`JobQueue::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Eligible only after `now + delay`. `None` means immediately.
    pub delay: Option<Duration>,
    /// Job key. `None` generates a unique one.
    pub key: Option<String>,
}

impl EnqueueOptions {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn resolve_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub(crate) fn fire_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.delay {
            Some(delay) => crate::clock::after(now, delay),
            None => now,
        }
    }
}

/// A permanently failed job kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob<J> {
    pub record: JobRecord<J>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Point-in-time queue sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub scheduled: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Payload-independent view of a queue, used by health endpoints.
#[async_trait]
pub trait QueueStats: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self) -> QueueResult<()>;

    async fn counts(&self) -> QueueResult<QueueCounts>;
}

/// A durable, delay-capable queue with keyed cancellation.
///
/// Every multi-step transition is atomic with respect to other callers, so
/// producers never need extra locking.
#[async_trait]
pub trait JobQueue<J: QueueJob>: QueueStats {
    /// Insert a job. A key that is already pending is overwritten (last write wins).
    async fn enqueue(&self, job: J, options: EnqueueOptions) -> QueueResult<JobRecord<J>>;

    /// Remove a pending job. Returns `false` when nothing was pending under `key`,
    /// including jobs that already fired or are in flight.
    async fn cancel(&self, key: &str) -> QueueResult<bool>;

    /// Look a job up by key.
    async fn get(&self, key: &str) -> QueueResult<Option<JobRecord<J>>>;

    /// Take the earliest job whose fire time has passed and lease it to the caller.
    async fn dequeue(&self) -> QueueResult<Option<JobRecord<J>>>;

    /// Settle a dequeued job as delivered.
    async fn complete(&self, record: &JobRecord<J>) -> QueueResult<()>;

    /// Put a dequeued job back with one more attempt recorded, eligible after `delay`.
    async fn retry(&self, record: &JobRecord<J>, delay: Duration, error: &str) -> QueueResult<()>;

    /// Settle a dequeued job as permanently failed.
    async fn fail(&self, record: &JobRecord<J>, error: &str) -> QueueResult<()>;

    /// Reschedule in-flight jobs whose lease expired. Returns how many were recovered.
    async fn recover_stalled(&self) -> QueueResult<u64>;

    /// Atomically claim `trigger_id` for `slot`. Only the first caller per slot wins
    /// until `ttl` elapses.
    async fn try_acquire_trigger(&self, trigger_id: &str, slot: &str, ttl: Duration) -> QueueResult<bool>;

    /// Most recent permanently failed jobs, newest first.
    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJob<J>>>;
}
