//! Worker and connection configuration
//!
//! This module provides `WorkerConfig` for the Worker Pool and `RedisSettings`
//! for the queue context.

use crate::registry::QueueDef;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or};
use uuid::Uuid;

/// Configuration for the queue worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue name
    pub queue_name: String,

    /// Unique worker ID (auto-generated if not provided)
    pub worker_id: String,

    /// Maximum jobs in flight at once
    pub concurrency: usize,

    /// Poll interval in milliseconds when no job is eligible
    pub poll_interval_ms: u64,

    /// How often to look for jobs whose lease expired
    pub stalled_check_interval_ms: u64,

    /// How long to wait for in-flight jobs on shutdown
    pub drain_timeout_ms: u64,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a QueueDef
    pub fn from_queue_def<D: QueueDef>() -> Self {
        Self::new(D::QUEUE_NAME).with_concurrency(D::CONCURRENCY)
    }

    /// Create a new WorkerConfig with explicit values
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: 5,
            poll_interval_ms: 500,
            stalled_check_interval_ms: 30_000,
            drain_timeout_ms: 30_000,
        }
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the maximum concurrent jobs
    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.concurrency = count.max(1);
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the stalled job check interval
    pub fn with_stalled_check_interval_ms(mut self, interval: u64) -> Self {
        self.stalled_check_interval_ms = interval;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout_ms(mut self, timeout: u64) -> Self {
        self.drain_timeout_ms = timeout;
        self
    }

    /// Overlay `WORKER_*` environment variables onto this config.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        let concurrency = env_parse_or("WORKER_CONCURRENCY", self.concurrency)?;
        let poll_interval_ms = env_parse_or("WORKER_POLL_INTERVAL_MS", self.poll_interval_ms)?;
        let drain_timeout_secs = env_parse_or("WORKER_DRAIN_TIMEOUT_SECS", self.drain_timeout_ms / 1000)?;

        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_CONCURRENCY".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(self
            .with_concurrency(concurrency)
            .with_poll_interval_ms(poll_interval_ms)
            .with_drain_timeout_ms(drain_timeout_secs * 1000))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("jobs")
    }
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub url: String,
}

impl RedisSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FromEnv for RedisSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("REDIS_URL", "redis://localhost:6379"),
        })
    }
}
