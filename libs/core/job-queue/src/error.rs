//! Queue error types and error categorization
//!
//! Every error maps to an [`ErrorCategory`] which the worker hands to the
//! [`RetryPolicy`](crate::RetryPolicy):
//! - **Transient**: temporary failure, retried with backoff within the attempt budget
//! - **Permanent**: retrying cannot help, the job fails immediately

use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Provider timeout, 5xx, broker hiccup
    Transient,
    /// Malformed payload, render bug, rejected request
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// Queue and job processing errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Job processing failed
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        category: ErrorCategory,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning queue context has been shut down
    #[error("Queue '{0}' is closed")]
    Closed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Create a transient processing error
    pub fn transient(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    /// Create a permanent processing error
    pub fn permanent(message: impl Into<String>) -> Self {
        QueueError::Processing {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::Redis(_) => ErrorCategory::Transient,
            QueueError::Serialization(_) => ErrorCategory::Permanent,
            QueueError::Processing { category, .. } => *category,
            QueueError::Config(_) => ErrorCategory::Permanent,
            QueueError::Closed(_) => ErrorCategory::Transient,
            QueueError::Internal(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::Redis(e) => e.is_connection_dropped() || e.is_io_error() || e.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<core_config::ConfigError> for QueueError {
    fn from(err: core_config::ConfigError) -> Self {
        QueueError::Config(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
