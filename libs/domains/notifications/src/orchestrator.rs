//! Notification orchestrator.
//!
//! Turns borrowing lifecycle events into queue operations. For every
//! borrowing there is at most one pending due reminder, stored under
//! [`due_reminder_key`]; rescheduling always cancels that key before
//! enqueueing again.
//!
//! | Event    | Queue operations                                                        |
//! |----------|-------------------------------------------------------------------------|
//! | issued   | `book-borrowed` now, `due-reminder` at due − 24h if that is still ahead  |
//! | returned | cancel the due reminder, `book-returned` now                            |
//! | extended | cancel the due reminder, new reminder at new due − 24h, `book-extended` |
//!
//! The borrowing has already been committed when these run, so no queue
//! failure is ever returned to the caller. Failures are logged and counted in
//! the [`DispatchReport`].

use crate::models::{LoanNotice, NotificationJob, NotificationKind, NotificationPayload};
use crate::queues::due_reminder_key;
use chrono::{DateTime, Duration, Utc};
use job_queue::{Clock, EnqueueOptions, JobQueue, SystemClock};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// What one lifecycle event did to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Kinds of the jobs that were enqueued, in order.
    pub enqueued: Vec<NotificationKind>,
    /// Whether a pending due reminder was removed.
    pub cancelled: bool,
    /// Fire time of the due reminder scheduled by this event, if any.
    pub reminder_at: Option<DateTime<Utc>>,
    /// Queue operations that failed.
    pub failures: usize,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

pub struct NotificationOrchestrator {
    queue: Arc<dyn JobQueue<NotificationJob>>,
    clock: Arc<dyn Clock>,
    reminder_lead: Duration,
}

impl NotificationOrchestrator {
    pub fn new(queue: Arc<dyn JobQueue<NotificationJob>>) -> Self {
        Self {
            queue,
            clock: Arc::new(SystemClock),
            reminder_lead: Duration::hours(24),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How long before the due date the reminder fires.
    pub fn with_reminder_lead(mut self, lead: Duration) -> Self {
        self.reminder_lead = lead;
        self
    }

    /// A book was issued and is due at `due_date`.
    #[instrument(skip(self, notice), fields(borrowing_id = %notice.borrowing_id))]
    pub async fn on_book_issued(&self, notice: &LoanNotice, due_date: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let confirmation = NotificationPayload::BookBorrowed {
            details: notice.details(),
            due_date,
        };
        self.send_now(notice, confirmation, &mut report).await;
        self.schedule_due_reminder(notice, due_date, &mut report).await;

        report
    }

    /// A book came back; its reminder must never fire.
    #[instrument(skip(self, notice), fields(borrowing_id = %notice.borrowing_id))]
    pub async fn on_book_returned(&self, notice: &LoanNotice) -> DispatchReport {
        let mut report = DispatchReport::default();

        self.cancel_due_reminder(notice.borrowing_id, &mut report).await;
        let confirmation = NotificationPayload::BookReturned {
            details: notice.details(),
        };
        self.send_now(notice, confirmation, &mut report).await;

        report
    }

    /// A borrowing's due date moved to `new_due_date`.
    #[instrument(skip(self, notice), fields(borrowing_id = %notice.borrowing_id))]
    pub async fn on_borrowing_extended(&self, notice: &LoanNotice, new_due_date: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        self.cancel_due_reminder(notice.borrowing_id, &mut report).await;
        self.schedule_due_reminder(notice, new_due_date, &mut report).await;
        let confirmation = NotificationPayload::BookExtended {
            details: notice.details(),
            new_due_date,
        };
        self.send_now(notice, confirmation, &mut report).await;

        report
    }

    /// Cancel the due reminder of a borrowing that was returned or extended
    /// when no email can be sent for it (no member email, unknown book).
    #[instrument(skip(self))]
    pub async fn discard_due_reminder(&self, borrowing_id: Uuid) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.cancel_due_reminder(borrowing_id, &mut report).await;
        report
    }

    async fn send_now(&self, notice: &LoanNotice, payload: NotificationPayload, report: &mut DispatchReport) {
        let kind = payload.kind();
        let job = NotificationJob::new(
            notice.member_email.clone(),
            Some(notice.borrowing_id),
            payload,
            self.clock.now(),
        );

        match self.queue.enqueue(job, EnqueueOptions::immediate()).await {
            Ok(record) => {
                info!(job_key = %record.key, job_type = %kind, recipient = %notice.member_email, "Queued notification");
                report.enqueued.push(kind);
            }
            Err(e) => {
                error!(
                    job_type = %kind,
                    recipient = %notice.member_email,
                    error = %e,
                    "Failed to queue notification"
                );
                report.failures += 1;
            }
        }
    }

    /// Enqueue the due reminder at `due_date - lead`, unless that moment has
    /// already passed.
    async fn schedule_due_reminder(&self, notice: &LoanNotice, due_date: DateTime<Utc>, report: &mut DispatchReport) {
        let now = self.clock.now();
        let fire_at = due_date - self.reminder_lead;
        let key = due_reminder_key(notice.borrowing_id);

        let delay = match (fire_at - now).to_std() {
            Ok(delay) if fire_at > now => delay,
            _ => {
                info!(job_key = %key, due_date = %due_date, "Reminder time already passed, not scheduling");
                return;
            }
        };

        let job = NotificationJob::new(
            notice.member_email.clone(),
            Some(notice.borrowing_id),
            NotificationPayload::DueReminder {
                details: notice.details(),
                due_date,
            },
            now,
        );

        match self.queue.enqueue(job, EnqueueOptions::delayed(delay).with_key(&key)).await {
            Ok(record) => {
                info!(job_key = %key, fire_at = %record.fire_at, "Scheduled due reminder");
                report.enqueued.push(NotificationKind::DueReminder);
                report.reminder_at = Some(record.fire_at);
            }
            Err(e) => {
                error!(job_key = %key, recipient = %notice.member_email, error = %e, "Failed to schedule due reminder");
                report.failures += 1;
            }
        }
    }

    async fn cancel_due_reminder(&self, borrowing_id: Uuid, report: &mut DispatchReport) {
        let key = due_reminder_key(borrowing_id);
        match self.queue.cancel(&key).await {
            Ok(removed) => {
                info!(job_key = %key, removed, "Cancelled due reminder");
                report.cancelled = removed;
            }
            Err(e) => {
                error!(job_key = %key, error = %e, "Failed to cancel due reminder");
                report.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::NotificationQueue;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use job_queue::{
        FailedJob, InMemoryJobQueue, JobRecord, ManualClock, QueueCounts, QueueError, QueueResult, QueueStats,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (NotificationOrchestrator, InMemoryJobQueue<NotificationJob>, ManualClock) {
        let clock = ManualClock::new(start());
        let queue = InMemoryJobQueue::from_queue_def::<NotificationQueue>(Arc::new(clock.clone()));
        let orchestrator = NotificationOrchestrator::new(Arc::new(queue.clone())).with_clock(Arc::new(clock.clone()));
        (orchestrator, queue, clock)
    }

    fn notice() -> LoanNotice {
        LoanNotice {
            borrowing_id: Uuid::new_v4(),
            member_email: "ada@example.com".into(),
            member_name: "Ada".into(),
            book_title: "Dune".into(),
            book_author: "Frank Herbert".into(),
            library_name: "Central".into(),
        }
    }

    async fn pending_reminders(queue: &InMemoryJobQueue<NotificationJob>, borrowing_id: Uuid) -> Vec<JobRecord<NotificationJob>> {
        let key = due_reminder_key(borrowing_id);
        queue.pending().await.into_iter().filter(|r| r.key == key).collect()
    }

    async fn pending_kinds(queue: &InMemoryJobQueue<NotificationJob>) -> Vec<NotificationKind> {
        queue.pending().await.iter().map(|r| r.job.kind()).collect()
    }

    #[tokio::test]
    async fn test_issue_enqueues_confirmation_and_reminder() {
        let (orchestrator, queue, _) = setup();
        let notice = notice();

        let report = orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;

        assert_eq!(report.enqueued, vec![NotificationKind::BookBorrowed, NotificationKind::DueReminder]);
        assert_eq!(report.reminder_at, Some(start() + Duration::days(13)));
        assert!(report.is_clean());

        let reminders = pending_reminders(&queue, notice.borrowing_id).await;
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].fire_at, start() + Duration::days(13));
        assert_eq!(reminders[0].job.borrowing_id, Some(notice.borrowing_id));
    }

    #[tokio::test]
    async fn test_past_reminder_time_is_skipped() {
        let (orchestrator, queue, _) = setup();

        // Due in 12 hours: the reminder would fire 12 hours ago
        let report = orchestrator.on_book_issued(&notice(), start() + Duration::hours(12)).await;
        assert_eq!(report.enqueued, vec![NotificationKind::BookBorrowed]);
        assert_eq!(report.reminder_at, None);

        // Exactly 24 hours: the reminder would fire now, which is not in the future
        let report = orchestrator.on_book_issued(&notice(), start() + Duration::hours(24)).await;
        assert_eq!(report.enqueued, vec![NotificationKind::BookBorrowed]);

        assert_eq!(
            pending_kinds(&queue).await,
            vec![NotificationKind::BookBorrowed, NotificationKind::BookBorrowed]
        );
    }

    #[tokio::test]
    async fn test_return_cancels_reminder() {
        let (orchestrator, queue, clock) = setup();
        let notice = notice();

        orchestrator.on_book_issued(&notice, start() + Duration::days(10)).await;
        clock.advance(Duration::days(2));
        let report = orchestrator.on_book_returned(&notice).await;

        assert!(report.cancelled);
        assert_eq!(report.enqueued, vec![NotificationKind::BookReturned]);
        assert!(pending_reminders(&queue, notice.borrowing_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_return_without_reminder_is_noop_cancel() {
        let (orchestrator, _, _) = setup();

        let report = orchestrator.on_book_returned(&notice()).await;

        assert!(!report.cancelled);
        assert!(report.is_clean());
        assert_eq!(report.enqueued, vec![NotificationKind::BookReturned]);
    }

    #[tokio::test]
    async fn test_extension_reschedules_single_reminder() {
        let (orchestrator, queue, _) = setup();
        let notice = notice();

        orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;
        let report = orchestrator
            .on_borrowing_extended(&notice, start() + Duration::days(21))
            .await;

        assert!(report.cancelled);
        assert_eq!(report.enqueued, vec![NotificationKind::DueReminder, NotificationKind::BookExtended]);

        let reminders = pending_reminders(&queue, notice.borrowing_id).await;
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].fire_at, start() + Duration::days(20));
    }

    #[tokio::test]
    async fn test_scenario_issue_extend_return() {
        let (orchestrator, queue, _) = setup();
        let notice = notice();
        let key = due_reminder_key(notice.borrowing_id);

        orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;
        assert_eq!(queue.pending_keys().await.len(), 2);
        assert_eq!(queue.get(&key).await.unwrap().unwrap().fire_at, start() + Duration::days(13));

        orchestrator
            .on_borrowing_extended(&notice, start() + Duration::days(21))
            .await;
        assert_eq!(queue.get(&key).await.unwrap().unwrap().fire_at, start() + Duration::days(20));
        let kinds = pending_kinds(&queue).await;
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&NotificationKind::BookBorrowed));
        assert!(kinds.contains(&NotificationKind::BookExtended));
        assert_eq!(kinds[2], NotificationKind::DueReminder);

        let report = orchestrator.on_book_returned(&notice).await;
        assert!(report.cancelled);
        assert!(queue.get(&key).await.unwrap().is_none());
        assert!(pending_reminders(&queue, notice.borrowing_id).await.is_empty());
        assert!(pending_kinds(&queue).await.contains(&NotificationKind::BookReturned));
    }

    #[tokio::test]
    async fn test_at_most_one_reminder_under_any_event_sequence() {
        let (orchestrator, queue, clock) = setup();
        let notice = notice();

        orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;
        // The third "extension" lands inside the 24h window and schedules nothing
        for days in [21, 28, 1] {
            orchestrator
                .on_borrowing_extended(&notice, start() + Duration::days(days))
                .await;
            assert!(pending_reminders(&queue, notice.borrowing_id).await.len() <= 1);
        }
        assert!(pending_reminders(&queue, notice.borrowing_id).await.is_empty());

        clock.advance(Duration::days(1));
        orchestrator.on_book_returned(&notice).await;
        orchestrator.on_book_returned(&notice).await;
        assert!(pending_reminders(&queue, notice.borrowing_id).await.is_empty());
    }

    /// A queue whose backing store is down.
    struct UnavailableQueue;

    #[async_trait]
    impl QueueStats for UnavailableQueue {
        fn name(&self) -> &str {
            "unavailable"
        }

        async fn ping(&self) -> QueueResult<()> {
            Err(QueueError::Closed("unavailable".into()))
        }

        async fn counts(&self) -> QueueResult<QueueCounts> {
            Err(QueueError::Closed("unavailable".into()))
        }
    }

    #[async_trait]
    impl JobQueue<NotificationJob> for UnavailableQueue {
        async fn enqueue(&self, _: NotificationJob, _: EnqueueOptions) -> QueueResult<JobRecord<NotificationJob>> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn cancel(&self, _: &str) -> QueueResult<bool> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn get(&self, _: &str) -> QueueResult<Option<JobRecord<NotificationJob>>> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn dequeue(&self) -> QueueResult<Option<JobRecord<NotificationJob>>> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn complete(&self, _: &JobRecord<NotificationJob>) -> QueueResult<()> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn retry(&self, _: &JobRecord<NotificationJob>, _: std::time::Duration, _: &str) -> QueueResult<()> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn fail(&self, _: &JobRecord<NotificationJob>, _: &str) -> QueueResult<()> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn recover_stalled(&self) -> QueueResult<u64> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn try_acquire_trigger(&self, _: &str, _: &str, _: std::time::Duration) -> QueueResult<bool> {
            Err(QueueError::Closed("unavailable".into()))
        }
        async fn failed_jobs(&self, _: usize) -> QueueResult<Vec<FailedJob<NotificationJob>>> {
            Err(QueueError::Closed("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_queue_failures_are_reported_not_raised() {
        let orchestrator = NotificationOrchestrator::new(Arc::new(UnavailableQueue))
            .with_clock(Arc::new(ManualClock::new(start())));
        let notice = notice();

        let issued = orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;
        assert_eq!(issued.failures, 2);
        assert!(issued.enqueued.is_empty());

        let extended = orchestrator
            .on_borrowing_extended(&notice, start() + Duration::days(21))
            .await;
        assert_eq!(extended.failures, 3);

        let returned = orchestrator.on_book_returned(&notice).await;
        assert_eq!(returned.failures, 2);
        assert!(!returned.is_clean());
    }

    #[tokio::test]
    async fn test_discard_due_reminder_by_id() {
        let (orchestrator, queue, _) = setup();
        let notice = notice();
        orchestrator.on_book_issued(&notice, start() + Duration::days(14)).await;

        let report = orchestrator.discard_due_reminder(notice.borrowing_id).await;

        assert!(report.cancelled);
        assert!(report.enqueued.is_empty());
        assert!(pending_reminders(&queue, notice.borrowing_id).await.is_empty());
        assert_eq!(pending_kinds(&queue).await, vec![NotificationKind::BookBorrowed]);
        assert!(!orchestrator.discard_due_reminder(notice.borrowing_id).await.cancelled);
    }
}
