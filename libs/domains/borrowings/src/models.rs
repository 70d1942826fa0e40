use chrono::{DateTime, Duration, Utc};
use domain_notifications::{ActiveLoan, LoanNotice};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A book lent to a member.
///
/// The due date moves forward at most once (`extended_at`), and a set
/// `returned_at` makes the borrowing terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrowing {
    pub id: Uuid,
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub librarian_id: Uuid,
    pub phone_at_borrow: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub extended_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Borrowing {
    pub fn is_returned(&self) -> bool {
        self.returned_at.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_returned() && self.due_date < now
    }

    pub fn can_extend(&self) -> bool {
        !self.is_returned() && self.extended_at.is_none()
    }
}

/// Per-library lending rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BorrowingPolicy {
    #[validate(range(min = 1, message = "Must allow at least 1 book"))]
    pub max_books_per_member: i32,

    #[validate(range(min = 1, message = "Must be at least 1 day"))]
    pub borrow_duration_days: i32,

    #[validate(range(min = 1, message = "Must be at least 1 day"))]
    pub extension_duration_days: i32,
}

impl Default for BorrowingPolicy {
    fn default() -> Self {
        Self {
            max_books_per_member: 5,
            borrow_duration_days: 14,
            extension_duration_days: 7,
        }
    }
}

impl BorrowingPolicy {
    pub fn due_date_from(&self, borrowed_at: DateTime<Utc>) -> DateTime<Utc> {
        borrowed_at + Duration::days(i64::from(self.borrow_duration_days))
    }

    pub fn extended_due_date(&self, due_date: DateTime<Utc>) -> DateTime<Utc> {
        due_date + Duration::days(i64::from(self.extension_duration_days))
    }
}

/// Request to lend a book, issued by a librarian of `library_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueBook {
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub librarian_id: Uuid,
    pub library_id: Uuid,

    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone: String,
}

/// Row written by [`BorrowingRepository::create`](crate::BorrowingRepository::create).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBorrowing {
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub librarian_id: Uuid,
    pub phone: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// Turn a joined borrowing row into the input of a lifecycle email.
///
/// `None` when there is nobody to write to or no book to write about.
pub fn loan_notice(loan: &ActiveLoan) -> Option<LoanNotice> {
    let email = loan.member_email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
    loan.book_title.as_ref()?;

    let details = loan.details();
    Some(LoanNotice {
        borrowing_id: loan.borrowing_id,
        member_email: email.to_string(),
        member_name: details.member_name,
        book_title: details.book_title,
        book_author: details.book_author,
        library_name: details.library_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn loan() -> ActiveLoan {
        let due = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        ActiveLoan {
            borrowing_id: Uuid::new_v4(),
            member_email: Some("ada@example.com".to_string()),
            member_name: "Ada".to_string(),
            book_title: Some("Dune".to_string()),
            book_author: None,
            library_name: None,
            due_date: due,
            borrowed_at: due - Duration::days(14),
            extended_at: None,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = BorrowingPolicy::default();
        assert_eq!(policy.borrow_duration_days, 14);
        assert_eq!(policy.extension_duration_days, 7);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_rejects_zero_days() {
        let policy = BorrowingPolicy {
            borrow_duration_days: 0,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("borrow_duration_days"));
    }

    #[test]
    fn test_due_dates() {
        let policy = BorrowingPolicy::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();

        let due = policy.due_date_from(now);
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap());
        assert_eq!(
            policy.extended_due_date(due),
            Utc.with_ymd_and_hms(2025, 3, 22, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_issue_book_requires_phone() {
        let input = IssueBook {
            book_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            librarian_id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            phone: String::new(),
        };
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("Phone number is required"));
    }

    #[test]
    fn test_extend_rules() {
        let now = Utc::now();
        let mut borrowing = Borrowing {
            id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            librarian_id: Uuid::new_v4(),
            phone_at_borrow: "555-0100".to_string(),
            borrowed_at: now - Duration::days(20),
            due_date: now - Duration::days(6),
            extended_at: None,
            returned_at: None,
        };
        assert!(borrowing.can_extend());
        assert!(borrowing.is_overdue(now));

        borrowing.extended_at = Some(now);
        assert!(!borrowing.can_extend());

        borrowing.extended_at = None;
        borrowing.returned_at = Some(now);
        assert!(!borrowing.can_extend());
        assert!(!borrowing.is_overdue(now));
    }

    #[test]
    fn test_loan_notice_fills_defaults() {
        let notice = loan_notice(&loan()).unwrap();
        assert_eq!(notice.member_email, "ada@example.com");
        assert_eq!(notice.book_author, "Unknown");
        assert_eq!(notice.library_name, "Library");
    }

    #[test]
    fn test_loan_notice_needs_email_and_book() {
        let mut no_email = loan();
        no_email.member_email = Some("  ".to_string());
        assert!(loan_notice(&no_email).is_none());

        let mut no_book = loan();
        no_book.book_title = None;
        assert!(loan_notice(&no_book).is_none());
    }
}
