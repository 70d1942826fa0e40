//! Job Queue Framework
//!
//! A durable, delay-capable job queue on Redis with a generic worker pool.
//!
//! ## Features
//!
//! - **Delayed jobs**: a job becomes eligible only after its fire time
//! - **Keyed jobs**: at most one pending job per key, cancellable by key
//! - **Worker pool**: `QueueWorker<J, P>` with bounded concurrency and graceful drain
//! - **Retry policy**: declarative attempt budget and exponential backoff
//! - **Stalled job recovery**: jobs of a crashed worker are rescheduled after their lease
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{EnqueueOptions, JobQueue, QueueContext, QueueDef, QueueWorker, WorkerConfig};
//!
//! struct EmailQueue;
//! impl QueueDef for EmailQueue {
//!     const QUEUE_NAME: &'static str = "email-notifications";
//! }
//!
//! let context = QueueContext::connect(&RedisSettings::from_env()?).await?;
//! let queue = Arc::new(context.queue::<EmailQueue, EmailJob>());
//!
//! queue
//!     .enqueue(job, EnqueueOptions::delayed(Duration::from_secs(3600)).with_key("reminder-42"))
//!     .await?;
//!
//! let worker = QueueWorker::new(queue, processor, WorkerConfig::from_queue_def::<EmailQueue>());
//! worker.run(shutdown_rx).await?;
//! context.shutdown();
//! ```

mod clock;
mod config;
mod context;
mod error;
mod health;
mod memory;
pub mod metrics;
mod queue;
mod redis_queue;
mod registry;
mod retry;
mod worker;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RedisSettings, WorkerConfig};
pub use context::QueueContext;
pub use error::{ErrorCategory, QueueError, QueueResult};
pub use health::{HealthState, health_router};
pub use memory::InMemoryJobQueue;
pub use metrics::{QueueMetrics, init_metrics};
pub use queue::{EnqueueOptions, FailedJob, JobQueue, JobRecord, QueueCounts, QueueStats};
pub use redis_queue::{QueueKeys, RedisJobQueue};
pub use registry::{QueueDef, QueueJob, QueueLimits};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use worker::{JobOutcome, JobProcessor, QueueWorker};
