//! SMTP delivery through lettre, for Mailpit/MailHog during development or a
//! relay in production.

use super::{DeliveryReceipt, EmailProvider, OutgoingEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_flag, env_or_default, env_parse_or};
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::{self, authentication::Credentials},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Sender, `Name <address>` or a bare address.
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Implicit TLS relay; plain connection when false.
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            from: from.into(),
            username: None,
            password: None,
            use_tls: false,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username.clone(), password.clone())),
            _ => None,
        }
    }
}

/// Defaults match a local Mailpit on port 1025.
impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse_or("SMTP_PORT", 1025u16)?,
            from: env_or_default("EMAIL_FROM", super::resend::DEFAULT_FROM),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls: env_flag("SMTP_USE_TLS", false),
        })
    }
}

pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl SmtpProvider {
    /// Fails on an unparseable sender or relay host; does not connect.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotificationError::ConfigError(format!("Invalid EMAIL_FROM '{}': {}", config.from, e)))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::ConfigError(format!("Invalid SMTP relay '{}': {}", config.host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);
        if let Some(credentials) = config.credentials() {
            builder = builder.credentials(credentials);
        }

        Ok(Self {
            transport: builder.build(),
            from,
            host: format!("{}:{}", config.host, config.port),
        })
    }

    pub fn from_env() -> NotificationResult<Self> {
        Self::new(SmtpConfig::from_env()?)
    }
}

/// Plain-text and HTML alternatives of one email.
fn compose(from: &Mailbox, email: &OutgoingEmail) -> NotificationResult<Message> {
    // Only the address is parsed; lettre quotes the display name itself.
    let address: Address = email
        .to
        .trim()
        .parse()
        .map_err(|e| NotificationError::InvalidRecipient(format!("{}: {}", email.to, e)))?;
    let name = Some(email.to_name.trim()).filter(|n| !n.is_empty()).map(str::to_string);
    let to = Mailbox::new(name, address);

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(&email.subject)
        .multipart(MultiPart::alternative_plain_html(email.text.clone(), email.html.clone()))
        .map_err(|e| NotificationError::TemplateError(format!("Failed to build email message: {}", e)))
}

/// 5xx replies will not change on a second attempt; connection problems and
/// 4xx replies might.
fn classify(err: smtp::Error) -> NotificationError {
    if err.is_permanent() {
        NotificationError::Rejected(format!("SMTP rejected message: {}", err))
    } else {
        NotificationError::ProviderError(format!("SMTP send failed: {}", err))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<DeliveryReceipt> {
        let message = compose(&self.from, email)?;
        debug!(to = %email.to, subject = %email.subject, host = %self.host, "Sending email via SMTP");

        let response = self.transport.send(message).await.map_err(|e| {
            warn!(to = %email.to, host = %self.host, error = %e, "SMTP send failed");
            classify(e)
        })?;

        let message_id = response.message().next().map(str::to_string);
        info!(to = %email.to, message_id = ?message_id, "Email sent via SMTP");

        Ok(DeliveryReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| NotificationError::ProviderError(format!("SMTP health check failed: {}", e)))
    }
}
