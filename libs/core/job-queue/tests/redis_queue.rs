//! Redis store integration tests.
//!
//! Run with `cargo test -p job-queue -- --ignored` (requires Docker).

use chrono::{TimeZone, Utc};
use job_queue::{
    EnqueueOptions, JobQueue, ManualClock, QueueContext, QueueDef, QueueError, QueueJob, QueueStats,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestRedis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reminder {
    borrowing: u32,
}

impl QueueJob for Reminder {
    fn job_type(&self) -> &'static str {
        "reminder"
    }
}

struct Reminders;

impl QueueDef for Reminders {
    const QUEUE_NAME: &'static str = "it-reminders";
    const FAILED_RETENTION: usize = 2;
    const LEASE_MS: u64 = 10_000;
}

async fn setup(redis: &TestRedis) -> (QueueContext, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
    let context = QueueContext::from_connection(redis.connection_manager().await).with_clock(Arc::new(clock.clone()));
    (context, clock)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_delayed_enqueue_and_dequeue() {
    let redis = TestRedis::new().await;
    let (context, clock) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();

    queue
        .enqueue(
            Reminder { borrowing: 1 },
            EnqueueOptions::delayed(Duration::from_secs(3600)).with_key("due-reminder-1"),
        )
        .await
        .unwrap();

    assert!(queue.dequeue().await.unwrap().is_none());

    clock.advance(chrono::Duration::hours(1));
    let record = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(record.key, "due-reminder-1");
    assert_eq!(record.job, Reminder { borrowing: 1 });

    queue.complete(&record).await.unwrap();
    let counts = queue.counts().await.unwrap();
    assert_eq!((counts.scheduled, counts.active, counts.completed), (0, 0, 1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_cancel_and_overwrite() {
    let redis = TestRedis::new().await;
    let (context, _) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();

    queue
        .enqueue(Reminder { borrowing: 1 }, EnqueueOptions::delayed(Duration::from_secs(60)).with_key("k"))
        .await
        .unwrap();
    let newer = queue
        .enqueue(Reminder { borrowing: 2 }, EnqueueOptions::delayed(Duration::from_secs(90)).with_key("k"))
        .await
        .unwrap();

    assert_eq!(queue.counts().await.unwrap().scheduled, 1);
    assert_eq!(queue.get("k").await.unwrap().unwrap().id, newer.id);

    assert!(queue.cancel("k").await.unwrap());
    assert!(!queue.cancel("k").await.unwrap());
    assert!(queue.get("k").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_retry_then_fail_with_retention() {
    let redis = TestRedis::new().await;
    let (context, clock) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();

    queue
        .enqueue(Reminder { borrowing: 7 }, EnqueueOptions::immediate().with_key("k"))
        .await
        .unwrap();

    let first = queue.dequeue().await.unwrap().unwrap();
    queue.retry(&first, Duration::from_secs(1), "timeout").await.unwrap();
    assert!(queue.dequeue().await.unwrap().is_none());

    clock.advance(chrono::Duration::seconds(1));
    let second = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(second.attempts, 1);
    assert_eq!(second.last_error.as_deref(), Some("timeout"));

    queue.fail(&second, "rejected").await.unwrap();
    for i in 0..2 {
        let record = queue
            .enqueue(Reminder { borrowing: i }, EnqueueOptions::immediate())
            .await
            .unwrap();
        queue.dequeue().await.unwrap().unwrap();
        queue.fail(&record, "bounced").await.unwrap();
    }

    let failed = queue.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|f| f.error == "bounced"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_recover_stalled_and_triggers() {
    let redis = TestRedis::new().await;
    let (context, clock) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();

    queue
        .enqueue(Reminder { borrowing: 3 }, EnqueueOptions::immediate().with_key("k"))
        .await
        .unwrap();
    queue.dequeue().await.unwrap().unwrap();

    clock.advance(chrono::Duration::seconds(11));
    assert_eq!(queue.recover_stalled().await.unwrap(), 1);
    assert_eq!(queue.dequeue().await.unwrap().unwrap().key, "k");

    let ttl = Duration::from_secs(60);
    assert!(queue.try_acquire_trigger("daily", "2025-03-01", ttl).await.unwrap());
    assert!(!queue.try_acquire_trigger("daily", "2025-03-01", ttl).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_closed_context_rejects_operations() {
    let redis = TestRedis::new().await;
    let (context, _) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();

    queue.ping().await.unwrap();
    context.shutdown();

    let err = queue
        .enqueue(Reminder { borrowing: 1 }, EnqueueOptions::immediate())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Closed(ref name) if name == "it-reminders"));
    assert!(context.is_closed());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unreadable_record_goes_to_failed_stream() {
    let redis = TestRedis::new().await;
    let (context, _) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();
    let keys = queue.keys().clone();
    let mut conn = redis.connection_manager().await;

    redis::pipe()
        .cmd("HSET")
        .arg(&keys.jobs)
        .arg("garbled")
        .arg(r#"{"not":"a record"}"#)
        .ignore()
        .cmd("ZADD")
        .arg(&keys.scheduled)
        .arg(0)
        .arg("garbled")
        .ignore()
        .query_async::<()>(&mut conn)
        .await
        .unwrap();
    queue
        .enqueue(Reminder { borrowing: 4 }, EnqueueOptions::immediate().with_key("good"))
        .await
        .unwrap();

    let record = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(record.key, "good");

    let stored: bool = redis::cmd("HEXISTS")
        .arg(&keys.jobs)
        .arg("garbled")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!stored);

    let counts = queue.counts().await.unwrap();
    assert_eq!((counts.scheduled, counts.active, counts.failed), (0, 1, 1));
    assert!(queue.failed_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_orphaned_schedule_entry_is_skipped() {
    let redis = TestRedis::new().await;
    let (context, _) = setup(&redis).await;
    let queue = context.queue::<Reminders, Reminder>();
    let mut conn = redis.connection_manager().await;

    redis::cmd("ZADD")
        .arg(&queue.keys().scheduled)
        .arg(0)
        .arg("orphan")
        .query_async::<()>(&mut conn)
        .await
        .unwrap();
    queue
        .enqueue(Reminder { borrowing: 5 }, EnqueueOptions::immediate().with_key("next"))
        .await
        .unwrap();

    let record = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(record.key, "next");
    assert_eq!(queue.counts().await.unwrap().scheduled, 0);
}
