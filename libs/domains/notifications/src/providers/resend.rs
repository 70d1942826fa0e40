//! Resend email provider implementation.

use super::{DeliveryReceipt, EmailProvider, OutgoingEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_required};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub(super) const DEFAULT_FROM: &str = "Library <onboarding@resend.dev>";
const DEFAULT_API_URL: &str = "https://api.resend.com";

/// Resend API configuration.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    /// Resend API key.
    pub api_key: String,
    /// Sender, `Name <address>` or a bare address.
    pub from: String,
    /// Resend API base URL (defaults to production).
    pub api_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ResendConfig {
    /// Create a new Resend configuration.
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from: from.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point the provider at another API host (a local stub, for instance).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

impl FromEnv for ResendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_required("RESEND_API_KEY")?;
        let from = env_or_default("EMAIL_FROM", DEFAULT_FROM);
        let api_url = env_or_default("RESEND_API_URL", DEFAULT_API_URL);

        Ok(Self::new(api_key, from).with_api_url(api_url))
    }
}

/// Resend email provider.
pub struct ResendProvider {
    config: ResendConfig,
    client: Client,
}

impl ResendProvider {
    /// Create a new Resend provider.
    pub fn new(config: ResendConfig) -> NotificationResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Create a provider from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        Self::new(ResendConfig::from_env()?)
    }
}

// Resend API request/response structures

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Fields are populated by deserialization from the Resend API
struct ResendErrorBody {
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
    name: Option<String>,
    message: String,
}

/// Whether a failed response is worth retrying.
///
/// Timeouts and rate limits clear up on their own. Any other 4xx means the
/// request itself is wrong.
fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ResendErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string())
}

#[async_trait]
impl EmailProvider for ResendProvider {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<DeliveryReceipt> {
        if email.to.trim().is_empty() || !email.to.contains('@') {
            return Err(NotificationError::InvalidRecipient(email.to.clone()));
        }

        let recipient = email.recipient();
        let request = SendEmailRequest {
            from: &self.config.from,
            to: vec![recipient.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        debug!(
            to = %email.to,
            subject = %email.subject,
            "Sending email via Resend"
        );

        let response = self
            .client
            .post(format!("{}/emails", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body: SendEmailResponse = response.json().await?;
            info!(
                to = %email.to,
                message_id = %body.id,
                "Email sent successfully via Resend"
            );
            return Ok(DeliveryReceipt {
                message_id: Some(body.id),
            });
        }

        let error_body = response.text().await.unwrap_or_default();
        let message = format!("Resend error ({}): {}", status, error_message(&error_body));
        error!(
            to = %email.to,
            status = %status,
            error = %error_body,
            "Failed to send email via Resend"
        );

        if is_retryable(status) {
            Err(NotificationError::ProviderError(message))
        } else {
            Err(NotificationError::Rejected(message))
        }
    }

    fn name(&self) -> &'static str {
        "Resend"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        // Resend has no health endpoint; a key always starts with "re_"
        if self.config.api_key.starts_with("re_") {
            Ok(true)
        } else {
            Err(NotificationError::ConfigError(
                "Invalid Resend API key format".to_string(),
            ))
        }
    }
}
