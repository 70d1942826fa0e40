//! Notifications Domain
//!
//! Email notifications for the borrowing lifecycle of a library.
//!
//! # Features
//!
//! - Borrowed, returned and extended confirmations
//! - Due reminders scheduled 24 hours before the due date
//! - Daily overdue and due-soon reminder scan
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌───────────────────┐
//! │ BorrowingService │        │ ReminderScheduler │  ← daily cron
//! └────────┬─────────┘        └─────────┬─────────┘
//!          │                            │
//! ┌────────▼──────────┐                 │
//! │ NotificationOrch. │  ← enqueue / cancel / reschedule
//! └────────┬──────────┘                 │
//!          │                            │
//! ┌────────▼────────────────────────────▼┐
//! │     Job Queue (email-notifications)   │  ← Redis, delayed + keyed jobs
//! └────────┬──────────────────────────────┘
//!          │
//! ┌────────▼─────────┐
//! │   QueueWorker    │  ← NotificationProcessor: render + send
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │  Email Provider  │  ← Resend, SMTP
//! └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{LoanNotice, NotificationOrchestrator, NotificationQueue};
//!
//! let queue = Arc::new(context.queue::<NotificationQueue, NotificationJob>());
//! let orchestrator = NotificationOrchestrator::new(queue);
//!
//! // After the borrowing has been committed
//! let report = orchestrator.on_book_issued(&notice, due_date).await;
//! ```

pub mod error;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod providers;
pub mod queues;
pub mod scheduler;
pub mod templates;

// Re-export commonly used types
pub use error::{NotificationError, NotificationResult};
pub use models::{ActiveLoan, LoanDetails, LoanNotice, NotificationJob, NotificationKind, NotificationPayload};
pub use orchestrator::{DispatchReport, NotificationOrchestrator};
pub use processor::NotificationProcessor;
pub use providers::{EmailProvider, ResendProvider, SmtpProvider};
pub use queues::{NotificationQueue, REMINDER_TRIGGER_ID, due_reminder_key};
pub use scheduler::{DueSoonMode, ReminderCron, ReminderScheduler, ReminderSource, ScanReport, SchedulerConfig};
pub use templates::{RenderedEmail, TemplateEngine};
