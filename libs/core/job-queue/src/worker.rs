//! Core worker trait and the generic QueueWorker implementation.
//!
//! This module provides:
//! - `JobProcessor` trait for job processors
//! - `QueueWorker` struct for running the worker loop
//! - `JobOutcome` describing how one attempt was settled

use crate::config::WorkerConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics::QueueMetrics;
use crate::queue::{JobQueue, JobRecord};
use crate::registry::QueueJob;
use crate::retry::{RetryDecision, RetryPolicy};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Trait for job processors.
///
/// Domain handlers implement this trait to perform the side effect of a job.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::{JobProcessor, JobRecord, QueueError};
///
/// #[async_trait]
/// impl JobProcessor<NotificationJob> for NotificationProcessor {
///     async fn process(&self, record: &JobRecord<NotificationJob>) -> Result<(), QueueError> {
///         let email = render(&record.job).map_err(|e| QueueError::permanent(e.to_string()))?;
///         self.provider.send(&email).await?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "NotificationProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait JobProcessor<J: QueueJob>: Send + Sync {
    /// Process a single attempt of a job.
    ///
    /// Return `Ok(())` for success. The error's category decides whether the
    /// attempt is retried.
    async fn process(&self, record: &JobRecord<J>) -> Result<(), QueueError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the processor.
    ///
    /// Default: always returns Ok(true).
    async fn health_check(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}

/// How a dequeued job was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Rescheduled; `attempt` is the attempt that just failed.
    Retrying { attempt: u32, delay: Duration },
    /// Recorded as permanently failed.
    Failed { attempts: u32, error: String },
}

/// Generic queue worker that processes jobs using a processor.
///
/// Jobs run concurrently up to `WorkerConfig::concurrency`, each in its own
/// task. On shutdown the worker stops dequeuing and waits for in-flight jobs
/// for at most `drain_timeout_ms`; anything still running after that is
/// aborted and picked up again once its lease expires.
pub struct QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J>,
{
    queue: Arc<dyn JobQueue<J>>,
    processor: Arc<P>,
    config: WorkerConfig,
    policy: RetryPolicy,
    /// Limits concurrent job processing
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    metrics: QueueMetrics,
    _phantom: PhantomData<J>,
}

impl<J, P> QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
{
    pub fn new(queue: Arc<dyn JobQueue<J>>, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(queue, Arc::new(processor), config)
    }

    /// Create a new worker with an Arc processor.
    pub fn with_arc_processor(queue: Arc<dyn JobQueue<J>>, processor: Arc<P>, config: WorkerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            metrics: QueueMetrics::new(config.queue_name.clone()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            queue,
            processor,
            config,
            policy: RetryPolicy::default(),
            _phantom: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Number of jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run the worker loop until the shutdown channel flips to `true`
    /// (or its sender is dropped), then drain in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.config.queue_name,
            processor = %self.processor.name(),
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting queue worker"
        );

        self.recover_stalled().await;

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let stalled_interval = Duration::from_millis(self.config.stalled_check_interval_ms);
        let mut last_stalled_check = Instant::now();
        let mut tasks: JoinSet<()> = JoinSet::new();

        // Track consecutive errors for exponential backoff
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Job task panicked");
                }
            }

            if last_stalled_check.elapsed() >= stalled_interval {
                self.recover_stalled().await;
                last_stalled_check = Instant::now();
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match self.queue.dequeue().await {
                Ok(Some(record)) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Queue connection recovered");
                        consecutive_errors = 0;
                    }

                    let queue = Arc::clone(&self.queue);
                    let processor = Arc::clone(&self.processor);
                    let policy = self.policy.clone();
                    let metrics = self.metrics.clone();
                    let in_flight = Arc::clone(&self.in_flight);

                    tasks.spawn(async move {
                        let _permit = permit;
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        metrics.in_flight(current);

                        let key = record.key.clone();
                        if let Err(e) =
                            Self::handle_record(queue.as_ref(), processor.as_ref(), &policy, &metrics, record).await
                        {
                            error!(job_key = %key, error = %e, "Failed to settle job, it will be recovered after its lease expires");
                        }

                        let current = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                        metrics.in_flight(current);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if Self::idle(&mut shutdown, poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    consecutive_errors += 1;

                    let backoff = if e.is_connection_error() {
                        Duration::from_secs(std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS))
                    } else {
                        poll_interval
                    };
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to dequeue, backing off"
                    );

                    if Self::idle(&mut shutdown, backoff).await {
                        break;
                    }
                }
            }
        }

        self.drain(tasks).await;
        info!(worker_id = %self.config.worker_id, "Queue worker stopped");
        Ok(())
    }

    /// Dequeue and process one eligible job inline.
    ///
    /// Returns `None` when nothing is due.
    pub async fn process_next(&self) -> QueueResult<Option<JobOutcome>> {
        match self.queue.dequeue().await? {
            Some(record) => {
                let outcome = Self::handle_record(
                    self.queue.as_ref(),
                    self.processor.as_ref(),
                    &self.policy,
                    &self.metrics,
                    record,
                )
                .await?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    async fn handle_record(
        queue: &dyn JobQueue<J>,
        processor: &P,
        policy: &RetryPolicy,
        metrics: &QueueMetrics,
        record: JobRecord<J>,
    ) -> QueueResult<JobOutcome> {
        let job_type = record.job.job_type();
        let correlation_id = record.job.correlation_id().unwrap_or_default();
        let attempt = record.attempts + 1;

        debug!(
            job_key = %record.key,
            job_type,
            correlation_id = %correlation_id,
            attempt,
            max_attempts = record.max_attempts,
            "Processing job"
        );

        let start = Instant::now();
        let error = match processor.process(&record).await {
            Ok(()) => {
                queue.complete(&record).await?;
                metrics.job_completed(job_type, start.elapsed());
                info!(
                    job_key = %record.key,
                    job_type,
                    correlation_id = %correlation_id,
                    attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e,
        };

        let category = error.category();
        let message = error.to_string();
        let decision = if attempt >= record.max_attempts {
            RetryDecision::GiveUp
        } else {
            policy.decide(attempt, category)
        };

        match decision {
            RetryDecision::RetryAfter(delay) => {
                queue.retry(&record, delay, &message).await?;
                metrics.job_retried(job_type);
                warn!(
                    job_key = %record.key,
                    job_type,
                    correlation_id = %correlation_id,
                    attempt,
                    max_attempts = record.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job failed, retrying"
                );
                Ok(JobOutcome::Retrying { attempt, delay })
            }
            RetryDecision::GiveUp => {
                queue.fail(&record, &message).await?;
                metrics.job_failed(job_type, category.as_str());
                error!(
                    job_key = %record.key,
                    job_type,
                    correlation_id = %correlation_id,
                    attempts = attempt,
                    max_attempts = record.max_attempts,
                    error_category = category.as_str(),
                    error = %message,
                    "Job permanently failed"
                );
                Ok(JobOutcome::Failed {
                    attempts: attempt,
                    error: message,
                })
            }
        }
    }

    async fn recover_stalled(&self) {
        match self.queue.recover_stalled().await {
            Ok(0) => {}
            Ok(count) => {
                self.metrics.stalled_recovered(count);
                warn!(count, "Recovered stalled jobs");
            }
            Err(e) => debug!(error = %e, "Failed to recover stalled jobs"),
        }
    }

    /// Wait for `duration` or a shutdown signal. Returns `true` to stop.
    async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        tokio::select! {
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(in_flight = tasks.len(), "Draining in-flight jobs");
        let timeout = Duration::from_millis(self.config.drain_timeout_ms);
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Job task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                drain_timeout_ms = self.config.drain_timeout_ms,
                "Drain timed out, aborting remaining jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorCategory;
    use crate::memory::InMemoryJobQueue;
    use crate::queue::EnqueueOptions;
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Delivery {
        to: String,
    }

    impl QueueJob for Delivery {
        fn job_type(&self) -> &'static str {
            "delivery"
        }
    }

    /// Fails the first `failures` calls with `category`, then succeeds.
    struct ScriptedProcessor {
        failures: u32,
        category: ErrorCategory,
        calls: AtomicU32,
    }

    impl ScriptedProcessor {
        fn new(failures: u32, category: ErrorCategory) -> Self {
            Self {
                failures,
                category,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobProcessor<Delivery> for ScriptedProcessor {
        async fn process(&self, _record: &JobRecord<Delivery>) -> Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(QueueError::Processing {
                    message: format!("provider said no ({})", call + 1),
                    category: self.category,
                })
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "ScriptedProcessor"
        }
    }

    fn setup(
        processor: ScriptedProcessor,
    ) -> (
        QueueWorker<Delivery, ScriptedProcessor>,
        InMemoryJobQueue<Delivery>,
        ManualClock,
        Arc<ScriptedProcessor>,
    ) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let queue = InMemoryJobQueue::with_clock("deliveries", Arc::new(clock.clone()));
        let processor = Arc::new(processor);
        let worker = QueueWorker::with_arc_processor(
            Arc::new(queue.clone()),
            processor.clone(),
            WorkerConfig::new("deliveries"),
        );
        (worker, queue, clock, processor)
    }

    fn delivery() -> Delivery {
        Delivery {
            to: "reader@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let (worker, queue, _, _) = setup(ScriptedProcessor::new(0, ErrorCategory::Transient));
        queue.enqueue(delivery(), EnqueueOptions::immediate()).await.unwrap();

        assert_eq!(worker.process_next().await.unwrap(), Some(JobOutcome::Completed));
        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(queue.completed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_three_attempts() {
        let (worker, queue, clock, processor) = setup(ScriptedProcessor::new(u32::MAX, ErrorCategory::Transient));
        queue.enqueue(delivery(), EnqueueOptions::immediate()).await.unwrap();

        assert_eq!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(1)
            })
        );

        // Backoff not elapsed yet
        assert_eq!(worker.process_next().await.unwrap(), None);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Retrying {
                attempt: 2,
                delay: Duration::from_secs(2)
            })
        );

        clock.advance(chrono::Duration::seconds(2));
        let outcome = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempts: 3, .. }));

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

        let failed = queue.failed().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].record.attempts, 3);
        assert!(failed[0].error.contains("provider said no (3)"));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let (worker, queue, clock, _) = setup(ScriptedProcessor::new(1, ErrorCategory::Transient));
        queue.enqueue(delivery(), EnqueueOptions::immediate()).await.unwrap();

        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Retrying { attempt: 1, .. })
        ));
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(worker.process_next().await.unwrap(), Some(JobOutcome::Completed));
        assert!(queue.failed().await.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (worker, queue, _, processor) = setup(ScriptedProcessor::new(u32::MAX, ErrorCategory::Permanent));
        queue.enqueue(delivery(), EnqueueOptions::immediate()).await.unwrap();

        let outcome = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempts: 1, .. }));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert!(queue.pending_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_processes_jobs_and_stops_on_shutdown() {
        let queue: InMemoryJobQueue<Delivery> = InMemoryJobQueue::new("deliveries");
        let processor = Arc::new(ScriptedProcessor::new(0, ErrorCategory::Transient));
        let worker = QueueWorker::with_arc_processor(
            Arc::new(queue.clone()),
            processor.clone(),
            WorkerConfig::new("deliveries")
                .with_concurrency(2)
                .with_poll_interval_ms(10),
        );

        for _ in 0..4 {
            queue.enqueue(delivery(), EnqueueOptions::immediate()).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        for _ in 0..200 {
            if queue.completed().await.len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.completed().await.len(), 4);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let queue: InMemoryJobQueue<Delivery> = InMemoryJobQueue::new("deliveries");
        let worker = QueueWorker::new(
            Arc::new(queue),
            ScriptedProcessor::new(0, ErrorCategory::Transient),
            WorkerConfig::new("deliveries").with_poll_interval_ms(10),
        );

        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .unwrap()
            .unwrap();
    }
}
