//! Notification processor for the queue worker.
//!
//! `NotificationProcessor` implements `JobProcessor<NotificationJob>`: it
//! renders the job's templates and hands the result to the configured
//! provider. Retrying is left to the worker.

use crate::models::NotificationJob;
use crate::providers::{EmailProvider, OutgoingEmail};
use crate::templates::TemplateEngine;
use async_trait::async_trait;
use job_queue::{JobProcessor, JobRecord, QueueError};
use std::sync::Arc;
use tracing::{info, warn};

/// Renders and sends one notification per job.
pub struct NotificationProcessor<P: EmailProvider> {
    provider: Arc<P>,
    templates: Arc<TemplateEngine>,
}

impl<P: EmailProvider + 'static> NotificationProcessor<P> {
    pub fn new(provider: P, templates: TemplateEngine) -> Self {
        Self {
            provider: Arc::new(provider),
            templates: Arc::new(templates),
        }
    }

    /// Create a new processor with Arc-wrapped dependencies.
    pub fn with_arcs(provider: Arc<P>, templates: Arc<TemplateEngine>) -> Self {
        Self { provider, templates }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P: EmailProvider + 'static> JobProcessor<NotificationJob> for NotificationProcessor<P> {
    async fn process(&self, record: &JobRecord<NotificationJob>) -> Result<(), QueueError> {
        let job = &record.job;
        let borrowing_id = job.borrowing_id.map(|id| id.to_string()).unwrap_or_default();

        info!(
            job_key = %record.key,
            job_type = %job.kind(),
            recipient = %job.to,
            borrowing_id = %borrowing_id,
            attempt = record.attempts + 1,
            "Processing notification job"
        );

        // A render failure is deterministic, so it converts to a permanent error
        let rendered = self.templates.render(job).map_err(|e| {
            warn!(job_key = %record.key, error = %e, "Failed to render notification");
            QueueError::from(e)
        })?;

        let email = OutgoingEmail::new(job, rendered);
        let receipt = self.provider.send(&email).await?;

        info!(
            job_key = %record.key,
            job_type = %job.kind(),
            recipient = %job.to,
            borrowing_id = %borrowing_id,
            provider = self.provider.name(),
            message_id = ?receipt.message_id,
            "Notification delivered"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "NotificationProcessor"
    }

    async fn health_check(&self) -> Result<bool, QueueError> {
        self.provider.health_check().await.map_err(QueueError::from)
    }
}

impl<P: EmailProvider> Clone for NotificationProcessor<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            templates: Arc::clone(&self.templates),
        }
    }
}
