//! Orchestrator → queue → worker → provider, on the in-memory queue.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use domain_notifications::providers::{DeliveryReceipt, OutgoingEmail};
use domain_notifications::{
    EmailProvider, LoanNotice, NotificationError, NotificationJob, NotificationOrchestrator, NotificationProcessor,
    NotificationQueue, NotificationResult, TemplateEngine,
};
use job_queue::{InMemoryJobQueue, JobOutcome, ManualClock, QueueWorker, WorkerConfig};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Records sent subjects; fails with `failure` while it is set.
#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<String>>,
    failure: Mutex<Option<fn() -> NotificationError>>,
}

impl RecordingProvider {
    fn failing(failure: fn() -> NotificationError) -> Self {
        Self {
            failure: Mutex::new(Some(failure)),
            ..Default::default()
        }
    }

    fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<DeliveryReceipt> {
        if let Some(failure) = *self.failure.lock().unwrap() {
            return Err(failure());
        }
        self.sent.lock().unwrap().push(email.subject.clone());
        Ok(DeliveryReceipt {
            message_id: Some(format!("msg-{}", self.sent.lock().unwrap().len())),
        })
    }

    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}

struct Pipeline {
    orchestrator: NotificationOrchestrator,
    worker: QueueWorker<NotificationJob, NotificationProcessor<RecordingProvider>>,
    queue: InMemoryJobQueue<NotificationJob>,
    provider: Arc<RecordingProvider>,
    clock: ManualClock,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn pipeline(provider: RecordingProvider) -> Pipeline {
    let clock = ManualClock::new(start());
    let queue = InMemoryJobQueue::from_queue_def::<NotificationQueue>(Arc::new(clock.clone()));
    let provider = Arc::new(provider);
    let processor = NotificationProcessor::with_arcs(provider.clone(), Arc::new(TemplateEngine::new().unwrap()));
    let worker = QueueWorker::new(
        Arc::new(queue.clone()),
        processor,
        WorkerConfig::from_queue_def::<NotificationQueue>(),
    );
    let orchestrator = NotificationOrchestrator::new(Arc::new(queue.clone())).with_clock(Arc::new(clock.clone()));

    Pipeline {
        orchestrator,
        worker,
        queue,
        provider,
        clock,
    }
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

async fn drain(p: &Pipeline) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = p.worker.process_next().await.unwrap() {
        outcomes.push(outcome);
    }
    outcomes
}

#[tokio::test]
async fn test_confirmation_now_reminder_a_day_before_due() {
    let p = pipeline(RecordingProvider::default());

    p.orchestrator.on_book_issued(&notice(), start() + Duration::days(14)).await;
    assert_eq!(drain(&p).await, vec![JobOutcome::Completed]);
    assert_eq!(p.provider.subjects(), vec!["You have borrowed: Dune"]);

    p.clock.advance(Duration::days(13) - Duration::seconds(1));
    assert!(drain(&p).await.is_empty());

    p.clock.advance(Duration::seconds(1));
    assert_eq!(drain(&p).await, vec![JobOutcome::Completed]);
    assert_eq!(
        p.provider.subjects(),
        vec!["You have borrowed: Dune", "Reminder: Dune is due tomorrow"]
    );
}

#[tokio::test]
async fn test_early_return_never_sends_reminder() {
    let p = pipeline(RecordingProvider::default());
    let notice = notice();

    p.orchestrator.on_book_issued(&notice, start() + Duration::days(10)).await;
    p.clock.advance(Duration::days(2));
    p.orchestrator.on_book_returned(&notice).await;

    p.clock.advance(Duration::days(30));
    drain(&p).await;

    assert_eq!(
        p.provider.subjects(),
        vec!["You have borrowed: Dune", "Book returned: Dune"]
    );
}

#[tokio::test]
async fn test_outage_exhausts_three_attempts() {
    let p = pipeline(RecordingProvider::failing(|| {
        NotificationError::ProviderError("503 Service Unavailable".into())
    }));

    p.orchestrator.on_book_returned(&notice()).await;

    let mut outcomes = drain(&p).await;
    for _ in 0..5 {
        p.clock.advance(Duration::seconds(30));
        outcomes.extend(drain(&p).await);
    }

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[2], JobOutcome::Failed { attempts: 3, .. }));
    assert_eq!(p.queue.failed().await.len(), 1);
    assert!(p.provider.subjects().is_empty());
}

#[tokio::test]
async fn test_rejected_email_fails_without_retry() {
    let p = pipeline(RecordingProvider::failing(|| {
        NotificationError::Rejected("422 invalid `to` field".into())
    }));

    p.orchestrator.on_book_returned(&notice()).await;

    let outcomes = drain(&p).await;
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Failed { attempts: 1, .. }]));
}
