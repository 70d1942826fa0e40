//! In-process [`JobQueue`] with the same semantics as the Redis store.
//!
//! Used by unit tests (paired with [`ManualClock`](crate::ManualClock)) and for
//! running the pipeline locally without Redis. Nothing survives a restart.

use crate::clock::{Clock, SystemClock, after};
use crate::error::QueueResult;
use crate::metrics::QueueMetrics;
use crate::queue::{EnqueueOptions, FailedJob, JobQueue, JobRecord, QueueCounts, QueueStats};
use crate::registry::{QueueDef, QueueJob, QueueLimits};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct State<J> {
    jobs: HashMap<String, JobRecord<J>>,
    /// key -> fire time
    scheduled: HashMap<String, DateTime<Utc>>,
    /// key -> lease expiry
    active: HashMap<String, DateTime<Utc>>,
    /// newest first
    completed: VecDeque<JobRecord<J>>,
    /// newest first
    failed: VecDeque<FailedJob<J>>,
    triggers: HashMap<String, DateTime<Utc>>,
}

impl<J> Default for State<J> {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
            scheduled: HashMap::new(),
            active: HashMap::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            triggers: HashMap::new(),
        }
    }
}

impl<J> State<J> {
    fn owns(&self, record: &JobRecord<J>) -> bool {
        self.jobs
            .get(&record.key)
            .is_some_and(|stored| stored.id == record.id)
    }

    /// Drops the lease of a record that was replaced while in flight, unless
    /// its replacement has been dequeued too and now holds the lease.
    fn release_replaced(&mut self, key: &str) {
        if self.scheduled.contains_key(key) || !self.jobs.contains_key(key) {
            self.active.remove(key);
        }
    }
}

/// In-memory job queue
#[derive(Clone)]
pub struct InMemoryJobQueue<J> {
    name: String,
    limits: QueueLimits,
    clock: Arc<dyn Clock>,
    metrics: QueueMetrics,
    state: Arc<RwLock<State<J>>>,
}

impl<J: QueueJob> InMemoryJobQueue<J> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        Self {
            metrics: QueueMetrics::new(name.clone()),
            name,
            limits: QueueLimits::default(),
            clock,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    pub fn from_queue_def<D: QueueDef>(clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(D::QUEUE_NAME, clock).with_limits(QueueLimits::from_def::<D>())
    }

    pub fn with_limits(mut self, limits: QueueLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Keys of jobs waiting for their fire time, sorted.
    pub async fn pending_keys(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut keys: Vec<String> = state.scheduled.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Pending jobs ordered by fire time.
    pub async fn pending(&self) -> Vec<JobRecord<J>> {
        let state = self.state.read().await;
        let mut records: Vec<JobRecord<J>> = state
            .scheduled
            .keys()
            .filter_map(|key| state.jobs.get(key).cloned())
            .collect();
        records.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        records
    }

    /// Retained completed jobs, newest first.
    pub async fn completed(&self) -> Vec<JobRecord<J>> {
        self.state.read().await.completed.iter().cloned().collect()
    }

    /// Retained permanently failed jobs, newest first.
    pub async fn failed(&self) -> Vec<FailedJob<J>> {
        self.state.read().await.failed.iter().cloned().collect()
    }
}

#[async_trait]
impl<J: QueueJob> QueueStats for InMemoryJobQueue<J> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let state = self.state.read().await;
        Ok(QueueCounts {
            scheduled: state.scheduled.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
        })
    }
}

#[async_trait]
impl<J: QueueJob> JobQueue<J> for InMemoryJobQueue<J> {
    async fn enqueue(&self, job: J, options: EnqueueOptions) -> QueueResult<JobRecord<J>> {
        let now = self.clock.now();
        let record = JobRecord::new(
            options.resolve_key(),
            job,
            options.fire_at(now),
            now,
            self.limits.max_attempts,
        );

        let mut state = self.state.write().await;
        state.scheduled.insert(record.key.clone(), record.fire_at);
        state.jobs.insert(record.key.clone(), record.clone());

        self.metrics.job_enqueued(record.job.job_type(), options.delay.is_some());
        Ok(record)
    }

    async fn cancel(&self, key: &str) -> QueueResult<bool> {
        let mut state = self.state.write().await;
        if state.scheduled.remove(key).is_some() {
            state.jobs.remove(key);
            self.metrics.job_cancelled();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get(&self, key: &str) -> QueueResult<Option<JobRecord<J>>> {
        Ok(self.state.read().await.jobs.get(key).cloned())
    }

    async fn dequeue(&self) -> QueueResult<Option<JobRecord<J>>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let next = state
            .scheduled
            .iter()
            .filter(|(_, fire_at)| **fire_at <= now)
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(key, _)| key.clone());

        let Some(key) = next else {
            return Ok(None);
        };

        state.scheduled.remove(&key);
        let Some(record) = state.jobs.get(&key).cloned() else {
            return Ok(None);
        };
        state.active.insert(key, after(now, self.limits.lease));

        Ok(Some(record))
    }

    async fn complete(&self, record: &JobRecord<J>) -> QueueResult<()> {
        let mut state = self.state.write().await;
        if !state.owns(record) {
            state.release_replaced(&record.key);
            return Ok(());
        }

        state.jobs.remove(&record.key);
        state.active.remove(&record.key);
        state.completed.push_front(record.clone());
        state.completed.truncate(self.limits.completed_retention);

        Ok(())
    }

    async fn retry(&self, record: &JobRecord<J>, delay: Duration, error: &str) -> QueueResult<()> {
        let fire_at = after(self.clock.now(), delay);
        let mut state = self.state.write().await;
        if !state.owns(record) {
            state.release_replaced(&record.key);
            return Ok(());
        }

        let next = record.next_attempt(fire_at, error);
        state.active.remove(&record.key);
        state.scheduled.insert(next.key.clone(), fire_at);
        state.jobs.insert(next.key.clone(), next);

        Ok(())
    }

    async fn fail(&self, record: &JobRecord<J>, error: &str) -> QueueResult<()> {
        let failed_at = self.clock.now();
        let mut state = self.state.write().await;

        if state.owns(record) {
            state.jobs.remove(&record.key);
            state.active.remove(&record.key);
        } else {
            state.release_replaced(&record.key);
        }

        state.failed.push_front(FailedJob {
            record: record.next_attempt(record.fire_at, error),
            error: error.to_string(),
            failed_at,
        });
        state.failed.truncate(self.limits.failed_retention);

        Ok(())
    }

    async fn recover_stalled(&self) -> QueueResult<u64> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, lease)| **lease <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut recovered = 0;
        for key in expired {
            state.active.remove(&key);
            if !state.scheduled.contains_key(&key) && state.jobs.contains_key(&key) {
                state.scheduled.insert(key, now);
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn try_acquire_trigger(&self, trigger_id: &str, slot: &str, ttl: Duration) -> QueueResult<bool> {
        let now = self.clock.now();
        let key = format!("{}:{}", trigger_id, slot);
        let mut state = self.state.write().await;

        match state.triggers.get(&key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                state.triggers.insert(key, after(now, ttl));
                Ok(true)
            }
        }
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJob<J>>> {
        let state = self.state.read().await;
        Ok(state.failed.iter().take(limit).cloned().collect())
    }
}
