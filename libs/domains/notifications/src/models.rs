//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use job_queue::QueueJob;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

// ============================================================================
// Notification Jobs (stored in the job queue)
// ============================================================================

/// Kinds of notification the pipeline can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationKind {
    /// Confirmation sent when a book is issued.
    BookBorrowed,
    /// Confirmation sent when a book comes back.
    BookReturned,
    /// Confirmation sent when a borrowing is extended.
    BookExtended,
    /// Sent 24 hours before the due date.
    DueReminder,
    /// Sent once per daily scan while a borrowing is overdue.
    OverdueReminder,
}

/// Loan fields shared by every notification kind.
///
/// Every field may be blank; the renderer substitutes a placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanDetails {
    pub member_name: String,
    pub book_title: String,
    pub book_author: String,
    pub library_name: String,
}

fn one_day() -> u32 {
    1
}

/// What to send, keyed by kind. Each variant carries only the fields its
/// template uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NotificationPayload {
    BookBorrowed {
        #[serde(flatten)]
        details: LoanDetails,
        due_date: DateTime<Utc>,
    },
    BookReturned {
        #[serde(flatten)]
        details: LoanDetails,
    },
    BookExtended {
        #[serde(flatten)]
        details: LoanDetails,
        new_due_date: DateTime<Utc>,
    },
    DueReminder {
        #[serde(flatten)]
        details: LoanDetails,
        due_date: DateTime<Utc>,
    },
    OverdueReminder {
        #[serde(flatten)]
        details: LoanDetails,
        due_date: DateTime<Utc>,
        #[serde(default = "one_day")]
        days_overdue: u32,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::BookBorrowed { .. } => NotificationKind::BookBorrowed,
            NotificationPayload::BookReturned { .. } => NotificationKind::BookReturned,
            NotificationPayload::BookExtended { .. } => NotificationKind::BookExtended,
            NotificationPayload::DueReminder { .. } => NotificationKind::DueReminder,
            NotificationPayload::OverdueReminder { .. } => NotificationKind::OverdueReminder,
        }
    }

    pub fn details(&self) -> &LoanDetails {
        match self {
            NotificationPayload::BookBorrowed { details, .. }
            | NotificationPayload::BookReturned { details }
            | NotificationPayload::BookExtended { details, .. }
            | NotificationPayload::DueReminder { details, .. }
            | NotificationPayload::OverdueReminder { details, .. } => details,
        }
    }
}

/// A notification waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    /// Recipient email address.
    pub to: String,
    /// Borrowing this notification is about, for log correlation.
    pub borrowing_id: Option<Uuid>,
    pub payload: NotificationPayload,
    pub created_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn new(
        to: impl Into<String>,
        borrowing_id: Option<Uuid>,
        payload: NotificationPayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            to: to.into(),
            borrowing_id,
            payload,
            created_at,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }
}

impl QueueJob for NotificationJob {
    fn job_type(&self) -> &'static str {
        self.kind().into()
    }

    fn correlation_id(&self) -> Option<String> {
        self.borrowing_id.map(|id| id.to_string())
    }
}

// ============================================================================
// Orchestrator and Scheduler Inputs
// ============================================================================

/// Who borrowed what, as handed over by the borrowing workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanNotice {
    pub borrowing_id: Uuid,
    pub member_email: String,
    pub member_name: String,
    pub book_title: String,
    pub book_author: String,
    pub library_name: String,
}

impl LoanNotice {
    pub fn details(&self) -> LoanDetails {
        LoanDetails {
            member_name: self.member_name.clone(),
            book_title: self.book_title.clone(),
            book_author: self.book_author.clone(),
            library_name: self.library_name.clone(),
        }
    }
}

/// A borrowing that has not been returned, as read by the reminder scan.
///
/// Joined rows can be incomplete (a deleted book, a member without an email
/// address), hence the optional fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLoan {
    pub borrowing_id: Uuid,
    pub member_email: Option<String>,
    pub member_name: String,
    pub book_title: Option<String>,
    pub book_author: Option<String>,
    pub library_name: Option<String>,
    pub due_date: DateTime<Utc>,
    pub borrowed_at: DateTime<Utc>,
    pub extended_at: Option<DateTime<Utc>>,
}

impl ActiveLoan {
    pub fn details(&self) -> LoanDetails {
        LoanDetails {
            member_name: self.member_name.clone(),
            book_title: self.book_title.clone().unwrap_or_else(|| "Unknown".to_string()),
            book_author: self.book_author.clone().unwrap_or_else(|| "Unknown".to_string()),
            library_name: self.library_name.clone().unwrap_or_else(|| "Library".to_string()),
        }
    }

    /// Last time the due date was set: the extension if any, else the issue.
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.extended_at.map_or(self.borrowed_at, |at| at.max(self.borrowed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn details() -> LoanDetails {
        LoanDetails {
            member_name: "Ada".into(),
            book_title: "Dune".into(),
            book_author: "Frank Herbert".into(),
            library_name: "Central".into(),
        }
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(NotificationKind::BookBorrowed.to_string(), "book-borrowed");
        assert_eq!(NotificationKind::OverdueReminder.to_string(), "overdue-reminder");
        assert_eq!(
            NotificationKind::from_str("due-reminder").unwrap(),
            NotificationKind::DueReminder
        );
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let due = Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap();
        let payload = NotificationPayload::OverdueReminder {
            details: details(),
            due_date: due,
            days_overdue: 4,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "overdue-reminder");
        assert_eq!(json["book_title"], "Dune");
        assert_eq!(json["days_overdue"], 4);
        assert!(json.get("new_due_date").is_none());
    }

    #[test]
    fn test_payload_tolerates_missing_loan_fields() {
        let json = r#"{"kind":"overdue-reminder","due_date":"2025-03-15T00:00:00Z"}"#;
        let payload: NotificationPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.kind(), NotificationKind::OverdueReminder);
        assert_eq!(payload.details(), &LoanDetails::default());
        assert!(matches!(payload, NotificationPayload::OverdueReminder { days_overdue: 1, .. }));
    }

    #[test]
    fn test_job_type_and_correlation() {
        let borrowing_id = Uuid::new_v4();
        let job = NotificationJob::new(
            "ada@example.com",
            Some(borrowing_id),
            NotificationPayload::BookReturned { details: details() },
            Utc::now(),
        );

        assert_eq!(job.job_type(), "book-returned");
        assert_eq!(job.correlation_id(), Some(borrowing_id.to_string()));
    }

    #[test]
    fn test_active_loan_fallbacks() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let loan = ActiveLoan {
            borrowing_id: Uuid::new_v4(),
            member_email: None,
            member_name: "Ada".into(),
            book_title: None,
            book_author: None,
            library_name: None,
            due_date: at,
            borrowed_at: at,
            extended_at: None,
        };

        let details = loan.details();
        assert_eq!(details.book_title, "Unknown");
        assert_eq!(details.book_author, "Unknown");
        assert_eq!(details.library_name, "Library");
        assert_eq!(loan.scheduled_at(), at);
    }
}
