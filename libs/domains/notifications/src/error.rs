//! Error types for the notifications domain.

use job_queue::QueueError;
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Email provider error (timeout, 5xx, connection refused).
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// The provider refused the request and will refuse it again.
    #[error("Email rejected by provider: {0}")]
    Rejected(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    TemplateError(String),

    /// Job queue error.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// The reminder scan could not read borrowings.
    #[error("Reminder source error: {0}")]
    SourceError(String),

    /// Invalid email address.
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Whether sending the same email again could succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NotificationError::Rejected(_)
                | NotificationError::TemplateError(_)
                | NotificationError::InvalidRecipient(_)
                | NotificationError::ConfigError(_)
        )
    }
}

impl From<QueueError> for NotificationError {
    fn from(err: QueueError) -> Self {
        NotificationError::QueueError(err.to_string())
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::TemplateError(err.to_string())
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::ProviderError(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for NotificationError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        NotificationError::Internal(format!("Scheduler error: {}", err))
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}

/// Lets a processor hand notification failures straight to the worker, which
/// retries only the transient ones.
impl From<NotificationError> for QueueError {
    fn from(err: NotificationError) -> Self {
        if err.is_permanent() {
            QueueError::permanent(err.to_string())
        } else {
            QueueError::transient(err.to_string())
        }
    }
}
