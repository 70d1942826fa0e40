//! Explicit ownership of the queue's Redis connection.
//!
//! A [`QueueContext`] is created once at startup and handed to whoever needs a
//! queue. Shutting it down closes every queue created from it.

use crate::clock::{Clock, SystemClock};
use crate::config::RedisSettings;
use crate::error::QueueResult;
use crate::redis_queue::RedisJobQueue;
use crate::registry::{QueueDef, QueueJob, QueueLimits};
use crate::retry::RetryPolicy;
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Connect to Redis and verify the connection with PING.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    info!("Attempting to connect to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

#[derive(Clone)]
pub struct QueueContext {
    redis: ConnectionManager,
    clock: Arc<dyn Clock>,
    closed: Arc<AtomicBool>,
}

impl QueueContext {
    /// Connect with the default startup retry (5 attempts, 500ms doubling).
    pub async fn connect(settings: &RedisSettings) -> QueueResult<Self> {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(5));
        Self::connect_with_retry(settings, &policy).await
    }

    pub async fn connect_with_retry(settings: &RedisSettings, policy: &RetryPolicy) -> QueueResult<Self> {
        let url = settings.url.clone();
        let redis = policy.run(|| connect(&url)).await?;
        Ok(Self::from_connection(redis))
    }

    /// Wrap an existing connection (tests, shared connections).
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self {
            redis,
            clock: Arc::new(SystemClock),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A queue for `D`, sharing this context's connection and shutdown flag.
    pub fn queue<D: QueueDef, J: QueueJob>(&self) -> RedisJobQueue<J> {
        RedisJobQueue::new(self.redis.clone(), D::QUEUE_NAME)
            .with_limits(QueueLimits::from_def::<D>())
            .with_clock(self.clock.clone())
            .with_closed_flag(self.closed.clone())
    }

    /// Like [`queue`](Self::queue) but with a name chosen at runtime.
    pub fn named_queue<J: QueueJob>(&self, name: &str, limits: QueueLimits) -> RedisJobQueue<J> {
        RedisJobQueue::new(self.redis.clone(), name)
            .with_limits(limits)
            .with_clock(self.clock.clone())
            .with_closed_flag(self.closed.clone())
    }

    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }

    /// Close every queue created from this context. Idempotent.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Queue context shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
