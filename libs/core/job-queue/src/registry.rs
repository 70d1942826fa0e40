//! Queue definitions and the job payload contract.
//!
//! This module provides:
//! - `QueueDef` trait for domain-specific queue definitions
//! - `QueueJob` trait for job payloads stored in a queue

use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Queue definition trait.
///
/// Each domain implements this trait to name its queue and tune retention.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::QueueDef;
///
/// pub struct NotificationQueue;
///
/// impl QueueDef for NotificationQueue {
///     const QUEUE_NAME: &'static str = "email-notifications";
/// }
/// ```
pub trait QueueDef: Send + Sync {
    /// The queue name, used as the Redis key prefix (`queue:<name>:*`).
    const QUEUE_NAME: &'static str;

    /// Attempts a job gets before it is recorded as permanently failed.
    const MAX_ATTEMPTS: u32 = 3;

    /// How many completed jobs to keep for inspection.
    const COMPLETED_RETENTION: usize = 100;

    /// How many permanently failed jobs to keep for inspection.
    const FAILED_RETENTION: usize = 50;

    /// How long a dequeued job may stay in flight before it is considered stalled.
    const LEASE_MS: u64 = 300_000;

    /// Default number of jobs a worker processes at once.
    const CONCURRENCY: usize = 5;

    /// Redis key prefix for this queue.
    fn key_prefix() -> String {
        format!("queue:{}", Self::QUEUE_NAME)
    }
}

/// Runtime copy of a [`QueueDef`]'s tuning, held by queue stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_attempts: u32,
    pub completed_retention: usize,
    pub failed_retention: usize,
    pub lease: Duration,
}

impl QueueLimits {
    pub fn from_def<D: QueueDef>() -> Self {
        Self {
            max_attempts: D::MAX_ATTEMPTS,
            completed_retention: D::COMPLETED_RETENTION,
            failed_retention: D::FAILED_RETENTION,
            lease: Duration::from_millis(D::LEASE_MS),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            completed_retention: 100,
            failed_retention: 50,
            lease: Duration::from_millis(300_000),
        }
    }
}

/// Trait for queue job payloads.
///
/// Attempts, fire time and identity live on the queue's
/// [`JobRecord`](crate::JobRecord), so payloads only describe the work.
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Short job type label for logs and metrics.
    fn job_type(&self) -> &'static str;

    /// Business identifier the job relates to, for log correlation.
    fn correlation_id(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestQueue;
    impl QueueDef for TestQueue {
        const QUEUE_NAME: &'static str = "test-queue";
    }

    struct TunedQueue;
    impl QueueDef for TunedQueue {
        const QUEUE_NAME: &'static str = "tuned";
        const MAX_ATTEMPTS: u32 = 5;
        const CONCURRENCY: usize = 1;
    }

    #[test]
    fn test_queue_def_defaults() {
        assert_eq!(TestQueue::key_prefix(), "queue:test-queue");
        assert_eq!(TestQueue::MAX_ATTEMPTS, 3);
        assert_eq!(TestQueue::COMPLETED_RETENTION, 100);
        assert_eq!(TestQueue::FAILED_RETENTION, 50);
        assert_eq!(TestQueue::CONCURRENCY, 5);
    }

    #[test]
    fn test_queue_def_overrides() {
        assert_eq!(TunedQueue::MAX_ATTEMPTS, 5);
        assert_eq!(TunedQueue::CONCURRENCY, 1);
        assert_eq!(TunedQueue::key_prefix(), "queue:tuned");
    }

    #[test]
    fn test_limits_from_def() {
        let limits = QueueLimits::from_def::<TunedQueue>();
        assert_eq!(limits.max_attempts, 5);
        assert_eq!(limits.lease, Duration::from_secs(300));
        assert_eq!(QueueLimits::from_def::<TestQueue>(), QueueLimits::default());
    }
}
