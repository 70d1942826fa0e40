//! Redis-backed [`JobQueue`].
//!
//! Layout under `queue:<name>`:
//!
//! ```text
//! :jobs                  HASH   key -> JobRecord JSON
//! :scheduled             ZSET   key, score = fire time (ms)
//! :active                ZSET   key, score = lease expiry (ms)
//! :completed             LIST   most recent completed records
//! :failed                STREAM most recent permanently failed jobs
//! :trigger:<id>:<slot>   STRING set-if-absent with TTL
//! ```
//!
//! Every transition that touches more than one key runs as a Lua script, so
//! concurrent producers and workers never observe a half-applied state.

use crate::clock::{Clock, SystemClock, after};
use crate::error::{QueueError, QueueResult};
use crate::metrics::QueueMetrics;
use crate::queue::{EnqueueOptions, FailedJob, JobQueue, JobRecord, QueueCounts, QueueStats};
use crate::registry::{QueueDef, QueueJob, QueueLimits};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

// Scheduled ids without a record are dropped on the way to the next due job.
const DEQUEUE_SCRIPT: &str = r#"
while true do
  local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
  if #due == 0 then
    return false
  end
  local key = due[1]
  redis.call('ZREM', KEYS[1], key)
  local raw = redis.call('HGET', KEYS[3], key)
  if raw then
    redis.call('ZADD', KEYS[2], ARGV[2], key)
    return {key, raw}
  end
end
"#;

// Only removes the record if it is still the one that failed to decode.
const DISCARD_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  redis.call('HDEL', KEYS[1], ARGV[1])
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('XADD', KEYS[3], 'MAXLEN', ARGV[4], '*', 'key', ARGV[1], 'raw', ARGV[2], 'error', ARGV[3])
return 1
"#;

const CANCEL_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('HDEL', KEYS[2], ARGV[1])
  return 1
end
return 0
"#;

const COMPLETE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw or cjson.decode(raw)['id'] ~= ARGV[2] then
  if not raw or redis.call('ZSCORE', KEYS[4], ARGV[1]) then
    redis.call('ZREM', KEYS[2], ARGV[1])
  end
  return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('LPUSH', KEYS[3], raw)
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[3]) - 1)
return 1
"#;

const RETRY_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw or cjson.decode(raw)['id'] ~= ARGV[2] then
  if not raw or redis.call('ZSCORE', KEYS[3], ARGV[1]) then
    redis.call('ZREM', KEYS[2], ARGV[1])
  end
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
return 1
"#;

const FAIL_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if raw and cjson.decode(raw)['id'] == ARGV[2] then
  redis.call('HDEL', KEYS[1], ARGV[1])
  redis.call('ZREM', KEYS[2], ARGV[1])
end
redis.call('XADD', KEYS[3], 'MAXLEN', ARGV[4], '*', 'data', ARGV[3])
return 1
"#;

const RECOVER_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local recovered = 0
for _, key in ipairs(expired) do
  redis.call('ZREM', KEYS[1], key)
  if not redis.call('ZSCORE', KEYS[2], key) and redis.call('HEXISTS', KEYS[3], key) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[1], key)
    recovered = recovered + 1
  end
end
return recovered
"#;

struct Scripts {
    dequeue: Script,
    cancel: Script,
    complete: Script,
    retry: Script,
    fail: Script,
    discard: Script,
    recover: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            dequeue: Script::new(DEQUEUE_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            retry: Script::new(RETRY_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            discard: Script::new(DISCARD_SCRIPT),
            recover: Script::new(RECOVER_SCRIPT),
        }
    }
}

/// Redis key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub jobs: String,
    pub scheduled: String,
    pub active: String,
    pub completed: String,
    pub failed: String,
    prefix: String,
}

impl QueueKeys {
    pub fn new(queue_name: &str) -> Self {
        let prefix = format!("queue:{}", queue_name);
        Self {
            jobs: format!("{}:jobs", prefix),
            scheduled: format!("{}:scheduled", prefix),
            active: format!("{}:active", prefix),
            completed: format!("{}:completed", prefix),
            failed: format!("{}:failed", prefix),
            prefix,
        }
    }

    pub fn trigger(&self, trigger_id: &str, slot: &str) -> String {
        format!("{}:trigger:{}:{}", self.prefix, trigger_id, slot)
    }
}

/// Redis job queue
pub struct RedisJobQueue<J> {
    redis: ConnectionManager,
    name: String,
    keys: QueueKeys,
    limits: QueueLimits,
    clock: Arc<dyn Clock>,
    closed: Arc<AtomicBool>,
    metrics: QueueMetrics,
    scripts: Arc<Scripts>,
    _job: PhantomData<fn() -> J>,
}

impl<J> Clone for RedisJobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            name: self.name.clone(),
            keys: self.keys.clone(),
            limits: self.limits.clone(),
            clock: self.clock.clone(),
            closed: self.closed.clone(),
            metrics: self.metrics.clone(),
            scripts: self.scripts.clone(),
            _job: PhantomData,
        }
    }
}

impl<J: QueueJob> RedisJobQueue<J> {
    /// Create a queue with default limits. Prefer [`QueueContext::queue`](crate::QueueContext::queue).
    pub fn new(redis: ConnectionManager, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            redis,
            keys: QueueKeys::new(&name),
            metrics: QueueMetrics::new(name.clone()),
            name,
            limits: QueueLimits::default(),
            clock: Arc::new(SystemClock),
            closed: Arc::new(AtomicBool::new(false)),
            scripts: Arc::new(Scripts::load()),
            _job: PhantomData,
        }
    }

    /// Create a queue from a `QueueDef` implementation.
    pub fn from_queue_def<D: QueueDef>(redis: ConnectionManager) -> Self {
        Self::new(redis, D::QUEUE_NAME).with_limits(QueueLimits::from_def::<D>())
    }

    pub fn with_limits(mut self, limits: QueueLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a shutdown flag with the owning context.
    pub(crate) fn with_closed_flag(mut self, closed: Arc<AtomicBool>) -> Self {
        self.closed = closed;
        self
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    fn conn(&self) -> QueueResult<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.name.clone()));
        }
        Ok(self.redis.clone())
    }

    fn decode(raw: &str) -> QueueResult<JobRecord<J>> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Moves a record that no longer decodes out of the active set and into
    /// the failed stream, so lease recovery does not keep rescheduling it.
    ///
    /// The stream entry has no `data` field; [`JobQueue::failed_jobs`] skips it.
    async fn discard_unreadable(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
        raw: &str,
        error: &QueueError,
    ) -> QueueResult<()> {
        warn!(queue = %self.name, job_key = %key, error = %error, "Discarding unreadable job record");

        self.scripts
            .discard
            .key(&self.keys.jobs)
            .key(&self.keys.active)
            .key(&self.keys.failed)
            .arg(key)
            .arg(raw)
            .arg(error.to_string())
            .arg(self.limits.failed_retention)
            .invoke_async::<i64>(conn)
            .await?;

        self.metrics.job_failed("unknown", "permanent");
        Ok(())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl<J: QueueJob> QueueStats for RedisJobQueue<J> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn()?;
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Internal(format!("unexpected PING response: {}", response)))
        }
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let mut conn = self.conn()?;
        let (scheduled, active, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("ZCARD")
            .arg(&self.keys.scheduled)
            .cmd("ZCARD")
            .arg(&self.keys.active)
            .cmd("LLEN")
            .arg(&self.keys.completed)
            .cmd("XLEN")
            .arg(&self.keys.failed)
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            scheduled,
            active,
            completed,
            failed,
        })
    }
}

#[async_trait]
impl<J: QueueJob> JobQueue<J> for RedisJobQueue<J> {
    async fn enqueue(&self, job: J, options: EnqueueOptions) -> QueueResult<JobRecord<J>> {
        let mut conn = self.conn()?;
        let now = self.clock.now();
        let record = JobRecord::new(
            options.resolve_key(),
            job,
            options.fire_at(now),
            now,
            self.limits.max_attempts,
        );
        let raw = serde_json::to_string(&record)?;

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&self.keys.jobs)
            .arg(&record.key)
            .arg(&raw)
            .ignore()
            .cmd("ZADD")
            .arg(&self.keys.scheduled)
            .arg(millis(record.fire_at))
            .arg(&record.key)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            queue = %self.name,
            job_key = %record.key,
            job_type = record.job.job_type(),
            fire_at = %record.fire_at,
            "Job enqueued"
        );
        self.metrics.job_enqueued(record.job.job_type(), options.delay.is_some());

        Ok(record)
    }

    async fn cancel(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.conn()?;
        let removed: i64 = self
            .scripts
            .cancel
            .key(&self.keys.scheduled)
            .key(&self.keys.jobs)
            .arg(key)
            .invoke_async(&mut conn)
            .await?;

        if removed == 1 {
            self.metrics.job_cancelled();
        }
        Ok(removed == 1)
    }

    async fn get(&self, key: &str) -> QueueResult<Option<JobRecord<J>>> {
        let mut conn = self.conn()?;
        let raw: Option<String> = redis::cmd("HGET")
            .arg(&self.keys.jobs)
            .arg(key)
            .query_async(&mut conn)
            .await?;

        raw.as_deref().map(Self::decode).transpose()
    }

    async fn dequeue(&self) -> QueueResult<Option<JobRecord<J>>> {
        let mut conn = self.conn()?;
        loop {
            let now = self.clock.now();
            let claimed: Option<(String, String)> = self
                .scripts
                .dequeue
                .key(&self.keys.scheduled)
                .key(&self.keys.active)
                .key(&self.keys.jobs)
                .arg(millis(now))
                .arg(millis(after(now, self.limits.lease)))
                .invoke_async(&mut conn)
                .await?;

            let Some((key, raw)) = claimed else {
                return Ok(None);
            };

            match Self::decode(&raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => self.discard_unreadable(&mut conn, &key, &raw, &e).await?,
            }
        }
    }

    async fn complete(&self, record: &JobRecord<J>) -> QueueResult<()> {
        let mut conn = self.conn()?;
        let settled: i64 = self
            .scripts
            .complete
            .key(&self.keys.jobs)
            .key(&self.keys.active)
            .key(&self.keys.completed)
            .key(&self.keys.scheduled)
            .arg(&record.key)
            .arg(record.id.to_string())
            .arg(self.limits.completed_retention)
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            debug!(job_key = %record.key, "Completed job was replaced while in flight");
        }
        Ok(())
    }

    async fn retry(&self, record: &JobRecord<J>, delay: Duration, error: &str) -> QueueResult<()> {
        let mut conn = self.conn()?;
        let next = record.next_attempt(after(self.clock.now(), delay), error);
        let raw = serde_json::to_string(&next)?;

        let settled: i64 = self
            .scripts
            .retry
            .key(&self.keys.jobs)
            .key(&self.keys.active)
            .key(&self.keys.scheduled)
            .arg(&record.key)
            .arg(record.id.to_string())
            .arg(raw)
            .arg(millis(next.fire_at))
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            debug!(job_key = %record.key, "Retried job was replaced while in flight");
        }
        Ok(())
    }

    async fn fail(&self, record: &JobRecord<J>, error: &str) -> QueueResult<()> {
        let mut conn = self.conn()?;
        let entry = FailedJob {
            record: record.next_attempt(record.fire_at, error),
            error: error.to_string(),
            failed_at: self.clock.now(),
        };
        let raw = serde_json::to_string(&entry)?;

        self.scripts
            .fail
            .key(&self.keys.jobs)
            .key(&self.keys.active)
            .key(&self.keys.failed)
            .arg(&record.key)
            .arg(record.id.to_string())
            .arg(raw)
            .arg(self.limits.failed_retention)
            .invoke_async::<i64>(&mut conn)
            .await?;

        Ok(())
    }

    async fn recover_stalled(&self) -> QueueResult<u64> {
        let mut conn = self.conn()?;
        let recovered: u64 = self
            .scripts
            .recover
            .key(&self.keys.active)
            .key(&self.keys.scheduled)
            .key(&self.keys.jobs)
            .arg(millis(self.clock.now()))
            .invoke_async(&mut conn)
            .await?;

        Ok(recovered)
    }

    async fn try_acquire_trigger(&self, trigger_id: &str, slot: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.conn()?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.keys.trigger(trigger_id, slot))
            .arg(millis(self.clock.now()))
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.is_some())
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJob<J>>> {
        let mut conn = self.conn()?;
        let entries: StreamEntries = redis::cmd("XREVRANGE")
            .arg(&self.keys.failed)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let failed = entries
            .into_iter()
            .filter_map(|(entry_id, fields)| {
                let data = fields.into_iter().find(|(name, _)| name == "data")?.1;
                match serde_json::from_str(&data) {
                    Ok(job) => Some(job),
                    Err(e) => {
                        warn!(entry_id = %entry_id, error = %e, "Skipping unreadable failed job entry");
                        None
                    }
                }
            })
            .collect();

        Ok(failed)
    }
}
