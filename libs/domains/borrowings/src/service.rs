use chrono::{DateTime, Utc};
use domain_notifications::{DispatchReport, LoanNotice, NotificationOrchestrator};
use job_queue::{Clock, SystemClock};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{BorrowingError, BorrowingResult};
use crate::models::{Borrowing, IssueBook, NewBorrowing, loan_notice};
use crate::repository::BorrowingRepository;

/// Lifecycle event handed to the notification pipeline after a commit.
#[derive(Debug, Clone, Copy)]
enum LoanEvent {
    Issued { due_date: DateTime<Utc> },
    Returned,
    Extended { new_due_date: DateTime<Utc> },
}

impl LoanEvent {
    /// The due reminder scheduled for the old due date must not fire.
    fn ends_due_reminder(self) -> bool {
        !matches!(self, LoanEvent::Issued { .. })
    }
}

/// Service layer for issuing, returning and extending borrowings
///
/// Emails are queued only after the repository call succeeded, and whatever
/// happens to them the service result stays that of the mutation.
#[derive(Clone)]
pub struct BorrowingService<R: BorrowingRepository> {
    repository: Arc<R>,
    notifications: Arc<NotificationOrchestrator>,
    clock: Arc<dyn Clock>,
}

impl<R: BorrowingRepository> BorrowingService<R> {
    pub fn new(repository: R, notifications: NotificationOrchestrator) -> Self {
        Self {
            repository: Arc::new(repository),
            notifications: Arc::new(notifications),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lend a book to a member
    #[instrument(skip(self, input), fields(book_id = %input.book_id, member_id = %input.member_id))]
    pub async fn issue_book(&self, input: IssueBook) -> BorrowingResult<Borrowing> {
        input.validate()?;

        let now = self.clock.now();
        let policy = self
            .repository
            .find_policy(input.library_id)
            .await?
            .unwrap_or_default();

        if self.repository.count_overdue_for_member(input.member_id, now).await? > 0 {
            return Err(BorrowingError::MemberHasOverdue(input.member_id));
        }

        let active = self.repository.count_active_for_member(input.member_id).await?;
        if active >= u64::try_from(policy.max_books_per_member).unwrap_or(0) {
            return Err(BorrowingError::LimitReached {
                member_id: input.member_id,
                max: policy.max_books_per_member,
            });
        }

        let due_date = policy.due_date_from(now);
        let borrowing = self
            .repository
            .create(NewBorrowing {
                book_id: input.book_id,
                member_id: input.member_id,
                librarian_id: input.librarian_id,
                phone: input.phone,
                borrowed_at: now,
                due_date,
            })
            .await?;

        self.notify(borrowing.id, LoanEvent::Issued { due_date }).await;
        Ok(borrowing)
    }

    /// Take a book back
    #[instrument(skip(self))]
    pub async fn return_book(&self, id: Uuid) -> BorrowingResult<Borrowing> {
        let mut borrowing = self.get_borrowing(id).await?;
        if borrowing.is_returned() {
            return Err(BorrowingError::AlreadyReturned(id));
        }

        let now = self.clock.now();
        if !self.repository.mark_returned(id, now).await? {
            return Err(BorrowingError::AlreadyReturned(id));
        }
        borrowing.returned_at = Some(now);

        self.notify(id, LoanEvent::Returned).await;
        Ok(borrowing)
    }

    /// Push the due date back once, by the extension period of `library_id`
    #[instrument(skip(self))]
    pub async fn extend_borrowing(&self, id: Uuid, library_id: Uuid) -> BorrowingResult<Borrowing> {
        let mut borrowing = self.get_borrowing(id).await?;
        if borrowing.is_returned() {
            return Err(BorrowingError::AlreadyReturned(id));
        }
        if borrowing.extended_at.is_some() {
            return Err(BorrowingError::AlreadyExtended(id));
        }

        let policy = self.repository.find_policy(library_id).await?.unwrap_or_default();
        let now = self.clock.now();
        let new_due_date = policy.extended_due_date(borrowing.due_date);

        // Lost a race against another extend or a return.
        if !self.repository.mark_extended(id, new_due_date, now).await? {
            return Err(BorrowingError::AlreadyExtended(id));
        }
        borrowing.due_date = new_due_date;
        borrowing.extended_at = Some(now);

        self.notify(id, LoanEvent::Extended { new_due_date }).await;
        Ok(borrowing)
    }

    /// Get a borrowing by ID
    pub async fn get_borrowing(&self, id: Uuid) -> BorrowingResult<Borrowing> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or(BorrowingError::NotFound(id))
    }

    async fn notify(&self, borrowing_id: Uuid, event: LoanEvent) {
        let Some(notice) = self.load_notice(borrowing_id, event).await else {
            if event.ends_due_reminder() {
                let report = self.notifications.discard_due_reminder(borrowing_id).await;
                if !report.is_clean() {
                    warn!(%borrowing_id, ?event, "Due reminder could not be cancelled");
                }
            }
            return;
        };

        let report: DispatchReport = match event {
            LoanEvent::Issued { due_date } => self.notifications.on_book_issued(&notice, due_date).await,
            LoanEvent::Returned => self.notifications.on_book_returned(&notice).await,
            LoanEvent::Extended { new_due_date } => {
                self.notifications.on_borrowing_extended(&notice, new_due_date).await
            }
        };

        if !report.is_clean() {
            warn!(%borrowing_id, ?event, failures = report.failures, "Some notifications could not be queued");
        }
    }

    async fn load_notice(&self, borrowing_id: Uuid, event: LoanEvent) -> Option<LoanNotice> {
        let loan = match self.repository.loan(borrowing_id).await {
            Ok(Some(loan)) => loan,
            Ok(None) => {
                warn!(%borrowing_id, ?event, "Borrowing vanished before notification");
                return None;
            }
            Err(e) => {
                warn!(%borrowing_id, ?event, error = %e, "Failed to load borrowing for notification");
                return None;
            }
        };

        let notice = loan_notice(&loan);
        if notice.is_none() {
            debug!(%borrowing_id, ?event, "No member email or book, skipping notification");
        }
        notice
    }
}
