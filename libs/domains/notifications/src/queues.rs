//! Queue definitions for the notifications domain.

use job_queue::QueueDef;
use uuid::Uuid;

/// Email notification queue.
pub struct NotificationQueue;

impl QueueDef for NotificationQueue {
    const QUEUE_NAME: &'static str = "email-notifications";
    const MAX_ATTEMPTS: u32 = 3;
    const COMPLETED_RETENTION: usize = 100;
    const FAILED_RETENTION: usize = 50;
    const CONCURRENCY: usize = 5;
}

/// Stable id of the daily reminder trigger, shared by every worker process.
pub const REMINDER_TRIGGER_ID: &str = "daily-overdue-check";

/// Key of the single pending due reminder of a borrowing.
///
/// Every producer of due reminders goes through this function, so a borrowing
/// can never hold two of them.
pub fn due_reminder_key(borrowing_id: Uuid) -> String {
    format!("due-reminder-{}", borrowing_id)
}
