use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_notifications::ActiveLoan;
use uuid::Uuid;

use crate::error::BorrowingResult;
use crate::models::{Borrowing, BorrowingPolicy, NewBorrowing};

/// Repository trait for Borrowing persistence
///
/// Every mutation is a single transaction; conditional updates report whether
/// they matched so concurrent callers cannot both return or both extend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BorrowingRepository: Send + Sync {
    /// Lending rules of a library, if it configured any
    async fn find_policy(&self, library_id: Uuid) -> BorrowingResult<Option<BorrowingPolicy>>;

    /// Unreturned borrowings of a member that were due before `now`
    async fn count_overdue_for_member(&self, member_id: Uuid, now: DateTime<Utc>) -> BorrowingResult<u64>;

    /// Unreturned borrowings of a member
    async fn count_active_for_member(&self, member_id: Uuid) -> BorrowingResult<u64>;

    /// Insert a borrowing, take one copy off the shelf and remember the
    /// member's phone number
    async fn create(&self, input: NewBorrowing) -> BorrowingResult<Borrowing>;

    /// Get a borrowing by ID
    async fn get_by_id(&self, id: Uuid) -> BorrowingResult<Option<Borrowing>>;

    /// Set `returned_at` unless already set, and put the copy back.
    /// Returns whether this call returned the book.
    async fn mark_returned(&self, id: Uuid, returned_at: DateTime<Utc>) -> BorrowingResult<bool>;

    /// Move the due date unless the borrowing was already extended or returned.
    /// Returns whether this call extended it.
    async fn mark_extended(
        &self,
        id: Uuid,
        new_due_date: DateTime<Utc>,
        extended_at: DateTime<Utc>,
    ) -> BorrowingResult<bool>;

    /// Borrowing joined with its member, book and library
    async fn loan(&self, id: Uuid) -> BorrowingResult<Option<ActiveLoan>>;
}
