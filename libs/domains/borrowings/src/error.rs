use domain_notifications::NotificationError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BorrowingError {
    #[error("Borrowing not found: {0}")]
    NotFound(Uuid),

    #[error("Borrowing {0} has already been returned")]
    AlreadyReturned(Uuid),

    #[error("Book has already been extended (borrowing {0})")]
    AlreadyExtended(Uuid),

    #[error("Member {0} has overdue books. Cannot issue new book.")]
    MemberHasOverdue(Uuid),

    #[error("Member {member_id} already has {max} books borrowed")]
    LimitReached { member_id: Uuid, max: i32 },

    #[error("No copies of book {0} are available")]
    NoCopiesAvailable(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type BorrowingResult<T> = Result<T, BorrowingError>;

impl From<sea_orm::DbErr> for BorrowingError {
    fn from(err: sea_orm::DbErr) -> Self {
        BorrowingError::Database(err.to_string())
    }
}

impl From<validator::ValidationErrors> for BorrowingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BorrowingError::Validation(err.to_string())
    }
}

/// The daily scan reads through the repository; its failures surface as
/// source errors in the scan report.
impl From<BorrowingError> for NotificationError {
    fn from(err: BorrowingError) -> Self {
        NotificationError::SourceError(err.to_string())
    }
}
