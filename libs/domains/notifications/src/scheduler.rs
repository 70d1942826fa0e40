//! Daily reminder scheduler.
//!
//! Once a day the scheduler scans unreturned borrowings and enqueues:
//! - an immediate `overdue-reminder` for every borrowing past its due date,
//!   repeated on every scan until the book comes back
//! - an immediate `due-reminder` for every borrowing due within the next
//!   24 hours, under the same [`due_reminder_key`] the orchestrator uses
//!
//! The cron fires in every worker process; a per-day trigger claimed in the
//! queue store makes sure only one of them runs the scan.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{ActiveLoan, NotificationJob, NotificationPayload};
use crate::queues::{REMINDER_TRIGGER_ID, due_reminder_key};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_config::{ConfigError, FromEnv, env_or_default};
use job_queue::{Clock, EnqueueOptions, JobQueue, SystemClock};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

/// Read side of the borrowing store used by the daily scan.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReminderSource: Send + Sync {
    /// Unreturned borrowings whose due date is before `now`.
    async fn overdue_loans(&self, now: DateTime<Utc>) -> NotificationResult<Vec<ActiveLoan>>;

    /// Unreturned borrowings due in `[from, to]`.
    async fn loans_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> NotificationResult<Vec<ActiveLoan>>;
}

/// Which due-soon borrowings the scan reminds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DueSoonMode {
    /// Every borrowing due within the window.
    All,
    /// Only borrowings whose due date was set inside the window, i.e. the ones
    /// that never got a delayed reminder.
    Uncovered,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Six-field cron expression (seconds first), evaluated in UTC.
    pub cron: String,
    pub trigger_id: String,
    pub due_soon_mode: DueSoonMode,
    /// Width of the due-soon window, also the reminder lead time.
    pub lead: Duration,
    /// How long a claimed trigger slot is held.
    pub trigger_ttl: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 9 * * *".to_string(),
            trigger_id: REMINDER_TRIGGER_ID.to_string(),
            due_soon_mode: DueSoonMode::All,
            lead: Duration::hours(24),
            trigger_ttl: std::time::Duration::from_secs(23 * 3600),
        }
    }
}

impl FromEnv for SchedulerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mode = env_or_default("REMINDER_DUE_SOON_MODE", "all");
        let due_soon_mode = DueSoonMode::from_str(mode.trim()).map_err(|_| ConfigError::InvalidValue {
            key: "REMINDER_DUE_SOON_MODE".to_string(),
            details: format!("expected 'all' or 'uncovered', got '{}'", mode),
        })?;

        Ok(Self {
            cron: env_or_default("REMINDER_CRON", &defaults.cron),
            trigger_id: env_or_default("REMINDER_TRIGGER_ID", &defaults.trigger_id),
            due_soon_mode,
            ..defaults
        })
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub overdue_enqueued: usize,
    pub due_soon_enqueued: usize,
    /// Due-soon borrowings left to their delayed reminder (`uncovered` mode).
    pub due_soon_covered: usize,
    pub skipped_missing_email: usize,
    /// Failed reads and failed enqueues.
    pub failures: usize,
}

/// Calendar days between the due date and `now`, at least one.
pub fn days_overdue(now: DateTime<Utc>, due_date: DateTime<Utc>) -> u32 {
    let days = (now.date_naive() - due_date.date_naive()).num_days();
    u32::try_from(days).unwrap_or(0).max(1)
}

fn recipient(loan: &ActiveLoan) -> Option<&str> {
    loan.member_email.as_deref().map(str::trim).filter(|email| !email.is_empty())
}

pub struct ReminderScheduler {
    queue: Arc<dyn JobQueue<NotificationJob>>,
    source: Arc<dyn ReminderSource>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl ReminderScheduler {
    pub fn new(queue: Arc<dyn JobQueue<NotificationJob>>, source: Arc<dyn ReminderSource>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            source,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register the daily cron job and start ticking.
    pub async fn start(self: Arc<Self>) -> NotificationResult<ReminderCron> {
        let mut sched = JobScheduler::new().await?;

        let scheduler = Arc::clone(&self);
        let job = Job::new_async(self.config.cron.as_str(), move |_uuid, _l| {
            let scheduler = Arc::clone(&scheduler);
            Box::pin(async move {
                scheduler.fire().await;
            })
        })
        .map_err(|e| NotificationError::ConfigError(format!("Invalid REMINDER_CRON '{}': {}", self.config.cron, e)))?;

        sched.add(job).await?;
        sched.start().await?;

        info!(
            cron = %self.config.cron,
            trigger_id = %self.config.trigger_id,
            due_soon_mode = %self.config.due_soon_mode,
            "Reminder scheduler started"
        );

        Ok(ReminderCron { sched })
    }

    /// One cron tick: claim today's trigger slot and scan if this process won it.
    pub async fn fire(&self) -> Option<ScanReport> {
        let now = self.clock.now();
        let slot = now.date_naive().to_string();

        match self
            .queue
            .try_acquire_trigger(&self.config.trigger_id, &slot, self.config.trigger_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(trigger_id = %self.config.trigger_id, slot = %slot, "Trigger already claimed");
                return None;
            }
            Err(e) => {
                error!(trigger_id = %self.config.trigger_id, error = %e, "Failed to claim reminder trigger");
                return None;
            }
        }

        let report = self.run_once().await;
        info!(
            slot = %slot,
            overdue = report.overdue_enqueued,
            due_soon = report.due_soon_enqueued,
            covered = report.due_soon_covered,
            skipped = report.skipped_missing_email,
            failures = report.failures,
            "Reminder scan complete"
        );
        Some(report)
    }

    /// Scan once, without claiming a trigger.
    pub async fn run_once(&self) -> ScanReport {
        let now = self.clock.now();
        let mut report = ScanReport::default();

        self.scan_overdue(now, &mut report).await;
        self.scan_due_soon(now, &mut report).await;

        report
    }

    async fn scan_overdue(&self, now: DateTime<Utc>, report: &mut ScanReport) {
        let loans = match self.source.overdue_loans(now).await {
            Ok(loans) => loans,
            Err(e) => {
                error!(error = %e, "Failed to load overdue borrowings");
                report.failures += 1;
                return;
            }
        };
        info!(count = loans.len(), "Found overdue borrowings");

        for loan in loans {
            let Some(to) = recipient(&loan) else {
                report.skipped_missing_email += 1;
                continue;
            };

            let payload = NotificationPayload::OverdueReminder {
                details: loan.details(),
                due_date: loan.due_date,
                days_overdue: days_overdue(now, loan.due_date),
            };
            let job = NotificationJob::new(to, Some(loan.borrowing_id), payload, now);

            if self.enqueue(job, EnqueueOptions::immediate(), &loan).await {
                report.overdue_enqueued += 1;
            } else {
                report.failures += 1;
            }
        }
    }

    async fn scan_due_soon(&self, now: DateTime<Utc>, report: &mut ScanReport) {
        let loans = match self.source.loans_due_between(now, now + self.config.lead).await {
            Ok(loans) => loans,
            Err(e) => {
                error!(error = %e, "Failed to load borrowings due soon");
                report.failures += 1;
                return;
            }
        };
        info!(count = loans.len(), "Found borrowings due within the reminder window");

        for loan in loans {
            let Some(to) = recipient(&loan) else {
                report.skipped_missing_email += 1;
                continue;
            };

            // Set before the window opened, so a delayed reminder was scheduled
            if self.config.due_soon_mode == DueSoonMode::Uncovered
                && loan.scheduled_at() < loan.due_date - self.config.lead
            {
                report.due_soon_covered += 1;
                continue;
            }

            let payload = NotificationPayload::DueReminder {
                details: loan.details(),
                due_date: loan.due_date,
            };
            let job = NotificationJob::new(to, Some(loan.borrowing_id), payload, now);
            let options = EnqueueOptions::immediate().with_key(due_reminder_key(loan.borrowing_id));

            if self.enqueue(job, options, &loan).await {
                report.due_soon_enqueued += 1;
            } else {
                report.failures += 1;
            }
        }
    }

    async fn enqueue(&self, job: NotificationJob, options: EnqueueOptions, loan: &ActiveLoan) -> bool {
        let kind = job.kind();
        let to = job.to.clone();
        match self.queue.enqueue(job, options).await {
            Ok(record) => {
                debug!(job_key = %record.key, job_type = %kind, borrowing_id = %loan.borrowing_id, recipient = %to, "Queued reminder");
                true
            }
            Err(e) => {
                warn!(
                    job_type = %kind,
                    borrowing_id = %loan.borrowing_id,
                    recipient = %to,
                    error = %e,
                    "Failed to queue reminder"
                );
                false
            }
        }
    }
}

/// Handle to the running cron job.
pub struct ReminderCron {
    sched: JobScheduler,
}

impl ReminderCron {
    pub async fn shutdown(mut self) -> NotificationResult<()> {
        self.sched.shutdown().await?;
        info!("Reminder scheduler stopped");
        Ok(())
    }
}
