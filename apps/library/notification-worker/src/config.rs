//! Worker service settings.

use core_config::{ConfigError, Environment, FromEnv, env_or_default, env_parse_or, env_required};
use domain_notifications::NotificationQueue;
use job_queue::{QueueDef, WorkerConfig};
use std::str::FromStr;
use strum::{Display, EnumString};

/// Which delivery adapter sends the emails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    Resend,
    /// Mailpit/MailHog in development
    Smtp,
}

impl ProviderKind {
    pub fn default_for(environment: &Environment) -> Self {
        if environment.is_production() {
            ProviderKind::Resend
        } else {
            ProviderKind::Smtp
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub environment: Environment,
    pub queue_name: String,
    pub health_port: u16,
    pub database_url: String,
    pub provider: ProviderKind,
    pub worker: WorkerConfig,
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();

        let provider = match std::env::var("EMAIL_PROVIDER") {
            Ok(raw) => ProviderKind::from_str(raw.trim()).map_err(|_| ConfigError::InvalidValue {
                key: "EMAIL_PROVIDER".to_string(),
                details: format!("expected 'resend' or 'smtp', got '{}'", raw),
            })?,
            Err(_) => ProviderKind::default_for(&environment),
        };

        let queue_name = env_or_default("NOTIFICATION_QUEUE", NotificationQueue::QUEUE_NAME);
        let worker = WorkerConfig::new(queue_name.clone())
            .with_concurrency(NotificationQueue::CONCURRENCY)
            .with_env_overrides()?;

        Ok(Self {
            environment,
            queue_name,
            health_port: env_parse_or("HEALTH_PORT", 8081)?,
            database_url: env_required("DATABASE_URL")?,
            provider,
            worker,
        })
    }
}
