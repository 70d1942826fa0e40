//! Delivery adapters.
//!
//! A provider makes exactly one send attempt per call and classifies the
//! failure (see [`NotificationError::is_permanent`](crate::NotificationError::is_permanent));
//! the queue worker decides whether to try again.

mod resend;
mod smtp;

pub use resend::{ResendConfig, ResendProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use crate::models::NotificationJob;
use crate::templates::RenderedEmail;
use async_trait::async_trait;

/// What the provider handed back for an accepted email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// A rendered notification addressed to one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    /// Display name, may be empty.
    pub to_name: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl OutgoingEmail {
    pub fn new(job: &NotificationJob, rendered: RenderedEmail) -> Self {
        Self {
            to: job.to.clone(),
            to_name: job.payload.details().member_name.trim().to_string(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        }
    }

    /// `Ada <ada@example.com>`, or the bare address without a name. Names with
    /// RFC 5322 specials (`Lovelace, Ada`) are sent as a quoted string.
    pub fn recipient(&self) -> String {
        if self.to_name.is_empty() {
            return self.to.clone();
        }
        if self.to_name.contains(|c: char| NAME_SPECIALS.contains(c)) {
            let escaped = self.to_name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\" <{}>", escaped, self.to)
        } else {
            format!("{} <{}>", self.to_name, self.to)
        }
    }
}

const NAME_SPECIALS: &str = "()<>[]:;@\\,.\"";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> NotificationResult<DeliveryReceipt>;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the provider is configured and reachable.
    async fn health_check(&self) -> NotificationResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_with_and_without_name() {
        let mut email = OutgoingEmail {
            to: "ada@example.com".to_string(),
            to_name: "Ada Lovelace".to_string(),
            ..Default::default()
        };
        assert_eq!(email.recipient(), "Ada Lovelace <ada@example.com>");

        email.to_name.clear();
        assert_eq!(email.recipient(), "ada@example.com");
    }

    #[test]
    fn test_recipient_quotes_names_with_specials() {
        let mut email = OutgoingEmail {
            to: "ada@example.com".to_string(),
            to_name: "Lovelace, Ada".to_string(),
            ..Default::default()
        };
        assert_eq!(email.recipient(), r#""Lovelace, Ada" <ada@example.com>"#);

        email.to_name = r#"Ada "Countess" Lovelace"#.to_string();
        assert_eq!(email.recipient(), r#""Ada \"Countess\" Lovelace" <ada@example.com>"#);

        email.to_name = r"A\B".to_string();
        assert_eq!(email.recipient(), r#""A\\B" <ada@example.com>"#);
    }
}
