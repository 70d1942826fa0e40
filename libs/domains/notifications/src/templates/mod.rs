//! Email template rendering engine.
//!
//! Handlebars templates for the five notification kinds, each with an HTML
//! and a plain-text body. Rendering never fails on blank loan fields; they are
//! replaced by placeholders before the template sees them.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{NotificationJob, NotificationKind, NotificationPayload};
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    /// Email subject line.
    pub subject: String,
    /// HTML body content.
    pub html: String,
    /// Plain text body content.
    pub text: String,
}

/// Subject line for a notification about `book_title`.
pub fn subject_line(kind: NotificationKind, book_title: &str) -> String {
    match kind {
        NotificationKind::BookBorrowed => format!("You have borrowed: {}", book_title),
        NotificationKind::BookReturned => format!("Book returned: {}", book_title),
        NotificationKind::BookExtended => format!("Borrowing extended: {}", book_title),
        NotificationKind::DueReminder => format!("Reminder: {} is due tomorrow", book_title),
        NotificationKind::OverdueReminder => format!("OVERDUE: {} needs to be returned", book_title),
    }
}

/// `March 5, 2025`
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}

/// Flat view of a payload handed to the templates.
#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    member_name: &'a str,
    book_title: &'a str,
    book_author: &'a str,
    library_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days_overdue: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days_label: Option<&'static str>,
}

impl<'a> TemplateData<'a> {
    fn from_payload(payload: &'a NotificationPayload) -> Self {
        let details = payload.details();
        let mut data = Self {
            member_name: or_default(&details.member_name, "Member"),
            book_title: or_default(&details.book_title, "Book Title"),
            book_author: or_default(&details.book_author, "Author Name"),
            library_name: or_default(&details.library_name, "Library"),
            due_date: None,
            new_due_date: None,
            days_overdue: None,
            days_label: None,
        };

        match payload {
            NotificationPayload::BookBorrowed { due_date, .. }
            | NotificationPayload::DueReminder { due_date, .. } => {
                data.due_date = Some(format_date(*due_date));
            }
            NotificationPayload::BookExtended { new_due_date, .. } => {
                data.new_due_date = Some(format_date(*new_due_date));
            }
            NotificationPayload::OverdueReminder {
                due_date, days_overdue, ..
            } => {
                let days = (*days_overdue).max(1);
                data.due_date = Some(format_date(*due_date));
                data.days_overdue = Some(days);
                data.days_label = Some(if days == 1 { "day" } else { "days" });
            }
            NotificationPayload::BookReturned { .. } => {}
        }

        data
    }
}

/// Template engine for rendering notification emails.
///
/// HTML and text bodies live in separate registries so that only the HTML
/// output is escaped.
#[derive(Clone)]
pub struct TemplateEngine {
    html: Arc<Handlebars<'static>>,
    text: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut html = Handlebars::new();
        let mut text = Handlebars::new();
        text.register_escape_fn(handlebars::no_escape);

        html.register_partial("layout", LAYOUT_HTML_PARTIAL)
            .map_err(|e| NotificationError::TemplateError(format!("Failed to register layout: {}", e)))?;
        html.register_partial("book_card", BOOK_CARD_HTML_PARTIAL)
            .map_err(|e| NotificationError::TemplateError(format!("Failed to register book_card: {}", e)))?;

        for (kind, html_source, text_source) in TEMPLATES {
            let name: &'static str = kind.into();
            html.register_template_string(name, html_source)
                .map_err(|e| NotificationError::TemplateError(format!("Failed to register {} html: {}", name, e)))?;
            text.register_template_string(name, text_source)
                .map_err(|e| NotificationError::TemplateError(format!("Failed to register {} text: {}", name, e)))?;
        }

        Ok(Self {
            html: Arc::new(html),
            text: Arc::new(text),
        })
    }

    /// Render the subject and both bodies for a queued notification.
    pub fn render(&self, job: &NotificationJob) -> NotificationResult<RenderedEmail> {
        let kind = job.kind();
        let name: &'static str = kind.into();
        let data = TemplateData::from_payload(&job.payload);

        debug!(kind = %kind, to = %job.to, "Rendering notification email");

        let html = self.html.render(name, &data)?;
        let text = self.text.render(name, &data)?;

        Ok(RenderedEmail {
            subject: subject_line(kind, data.book_title),
            html,
            text,
        })
    }
}

// ============================================================================
// Email Templates
// ============================================================================

const TEMPLATES: [(NotificationKind, &str, &str); 5] = [
    (NotificationKind::BookBorrowed, BOOK_BORROWED_HTML_TEMPLATE, BOOK_BORROWED_TEXT_TEMPLATE),
    (NotificationKind::BookReturned, BOOK_RETURNED_HTML_TEMPLATE, BOOK_RETURNED_TEXT_TEMPLATE),
    (NotificationKind::BookExtended, BOOK_EXTENDED_HTML_TEMPLATE, BOOK_EXTENDED_TEXT_TEMPLATE),
    (NotificationKind::DueReminder, DUE_REMINDER_HTML_TEMPLATE, DUE_REMINDER_TEXT_TEMPLATE),
    (NotificationKind::OverdueReminder, OVERDUE_REMINDER_HTML_TEMPLATE, OVERDUE_REMINDER_TEXT_TEMPLATE),
];

const LAYOUT_HTML_PARTIAL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{library_name}}</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Ubuntu, sans-serif; background-color: #f6f9fc;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 560px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; padding: 40px 20px;">
        <h1 style="color: {{heading_color}}; font-size: 24px; font-weight: 600; margin: 0 0 30px 0; text-align: center;">
          {{{heading}}}
        </h1>
        <p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
          Dear {{member_name}},
        </p>
        {{> @partial-block}}
        <p style="color: #999999; font-size: 14px; margin: 30px 0 0 0;">
          &mdash; {{library_name}}
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

const BOOK_CARD_HTML_PARTIAL: &str = r#"<table width="100%" cellspacing="0" cellpadding="0" style="margin: 20px 0;">
  <tr>
    <td style="background-color: {{background}}; border-radius: 8px; padding: 20px; border: 1px solid {{border}};">
      <p style="color: {{color}}; font-size: 18px; font-weight: 600; margin: 0 0 8px 0;">{{{icon}}} {{book_title}}</p>
      <p style="color: {{color}}; font-size: 14px; margin: 0;">by {{book_author}}</p>
    </td>
  </tr>
</table>"#;

const BOOK_BORROWED_HTML_TEMPLATE: &str = r##"{{#> layout heading="Book Borrowed Successfully" heading_color="#1a1a1a"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  You have successfully borrowed the following book from {{library_name}}:
</p>
{{> book_card icon="&#128218;" background="#f0f7ff" border="#d0e3ff" color="#1a1a1a"}}
<table width="100%" cellspacing="0" cellpadding="0" style="margin: 20px 0;">
  <tr>
    <td style="background-color: #fff3cd; border-radius: 8px; padding: 16px; text-align: center;">
      <p style="color: #856404; font-size: 12px; font-weight: 600; text-transform: uppercase; margin: 0 0 4px 0;">Due Date</p>
      <p style="color: #856404; font-size: 20px; font-weight: 700; margin: 0;">{{due_date}}</p>
    </td>
  </tr>
</table>
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  Please return the book on or before the due date to avoid overdue notices.
</p>
{{/layout}}"##;

const BOOK_BORROWED_TEXT_TEMPLATE: &str = r#"Book Borrowed Successfully

Dear {{member_name}},

You have successfully borrowed the following book from {{library_name}}:

  {{book_title}}
  by {{book_author}}

Due Date: {{due_date}}

Please return the book on or before the due date to avoid overdue notices.

- {{library_name}}"#;

const BOOK_RETURNED_HTML_TEMPLATE: &str = r##"{{#> layout heading="Book Returned Successfully" heading_color="#1a1a1a"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  Thank you for returning the following book to {{library_name}}:
</p>
{{> book_card icon="&#9989;" background="#d4edda" border="#c3e6cb" color="#155724"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  We hope you enjoyed the book! Feel free to visit us again to borrow more books.
</p>
{{/layout}}"##;

const BOOK_RETURNED_TEXT_TEMPLATE: &str = r#"Book Returned Successfully

Dear {{member_name}},

Thank you for returning the following book to {{library_name}}:

  {{book_title}}
  by {{book_author}}

We hope you enjoyed the book! Feel free to visit us again to borrow more books.

- {{library_name}}"#;

const BOOK_EXTENDED_HTML_TEMPLATE: &str = r##"{{#> layout heading="Borrowing Extended" heading_color="#1a1a1a"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  Your borrowing period has been extended for the following book:
</p>
{{> book_card icon="&#128260;" background="#f0f7ff" border="#d0e3ff" color="#1a1a1a"}}
<table width="100%" cellspacing="0" cellpadding="0" style="margin: 20px 0;">
  <tr>
    <td style="background-color: #d4edda; border-radius: 8px; padding: 16px; text-align: center;">
      <p style="color: #155724; font-size: 12px; font-weight: 600; text-transform: uppercase; margin: 0 0 4px 0;">New Due Date</p>
      <p style="color: #155724; font-size: 20px; font-weight: 700; margin: 0;">{{new_due_date}}</p>
    </td>
  </tr>
</table>
<p style="color: #666666; font-size: 14px; font-style: italic; margin: 16px 0;">
  Note: Extensions can only be granted once per borrowing.
</p>
{{/layout}}"##;

const BOOK_EXTENDED_TEXT_TEMPLATE: &str = r#"Borrowing Extended

Dear {{member_name}},

Your borrowing period has been extended for the following book:

  {{book_title}}
  by {{book_author}}

New Due Date: {{new_due_date}}

Note: Extensions can only be granted once per borrowing.

- {{library_name}}"#;

const DUE_REMINDER_HTML_TEMPLATE: &str = r##"{{#> layout heading="&#9200; Book Due Tomorrow" heading_color="#1a1a1a"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  This is a friendly reminder that the following book is due tomorrow:
</p>
{{> book_card icon="&#128218;" background="#fff3cd" border="#ffeeba" color="#856404"}}
<table width="100%" cellspacing="0" cellpadding="0" style="margin: 20px 0;">
  <tr>
    <td style="background-color: #ffc107; border-radius: 8px; padding: 16px; text-align: center;">
      <p style="color: #000000; font-size: 12px; font-weight: 600; text-transform: uppercase; margin: 0 0 4px 0;">Due Date</p>
      <p style="color: #000000; font-size: 20px; font-weight: 700; margin: 0;">{{due_date}}</p>
    </td>
  </tr>
</table>
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  Please return the book on time to avoid overdue notices. If you need more time, visit the library to request an extension.
</p>
{{/layout}}"##;

const DUE_REMINDER_TEXT_TEMPLATE: &str = r#"Book Due Tomorrow

Dear {{member_name}},

This is a friendly reminder that the following book is due tomorrow:

  {{book_title}}
  by {{book_author}}

Due Date: {{due_date}}

Please return the book on time to avoid overdue notices. If you need more time, visit the library to request an extension.

- {{library_name}}"#;

const OVERDUE_REMINDER_HTML_TEMPLATE: &str = r##"{{#> layout heading="&#9888; Book Overdue" heading_color="#dc3545"}}
<p style="color: #484848; font-size: 16px; line-height: 24px; margin: 16px 0;">
  The following book is overdue and needs to be returned immediately:
</p>
{{> book_card icon="&#128213;" background="#f8d7da" border="#f5c6cb" color="#721c24"}}
<table width="100%" cellspacing="0" cellpadding="0" style="margin: 20px 0;">
  <tr>
    <td style="background-color: #dc3545; border-radius: 8px; padding: 20px; text-align: center;">
      <p style="color: #ffffff; font-size: 12px; font-weight: 600; text-transform: uppercase; margin: 0 0 4px 0;">Overdue By</p>
      <p style="color: #ffffff; font-size: 28px; font-weight: 700; margin: 0 0 8px 0;">{{days_overdue}} {{days_label}}</p>
      <p style="color: #ffcccc; font-size: 12px; margin: 0;">Originally due: {{due_date}}</p>
    </td>
  </tr>
</table>
<p style="color: #721c24; background-color: #fff3cd; font-size: 16px; line-height: 24px; padding: 16px; border-radius: 8px; margin: 16px 0;">
  Please return this book as soon as possible. Continued overdue status may affect your ability to borrow books in the future.
</p>
{{/layout}}"##;

const OVERDUE_REMINDER_TEXT_TEMPLATE: &str = r#"Book Overdue

Dear {{member_name}},

The following book is overdue and needs to be returned immediately:

  {{book_title}}
  by {{book_author}}

Overdue By: {{days_overdue}} {{days_label}}
Originally due: {{due_date}}

Please return this book as soon as possible. Continued overdue status may affect your ability to borrow books in the future.

- {{library_name}}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanDetails;
    use chrono::TimeZone;

    fn details() -> LoanDetails {
        LoanDetails {
            member_name: "Ada Lovelace".to_string(),
            book_title: "Dune".to_string(),
            book_author: "Frank Herbert".to_string(),
            library_name: "Central Library".to_string(),
        }
    }

    fn job(payload: NotificationPayload) -> NotificationJob {
        NotificationJob::new("ada@example.com", None, payload, Utc::now())
    }

    fn march(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_template_engine_creation() {
        let engine = TemplateEngine::new();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(march(5)), "March 5, 2025");
        assert_eq!(format_date(march(15)), "March 15, 2025");
    }

    #[test]
    fn test_render_borrowed_email() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(&job(NotificationPayload::BookBorrowed {
                details: details(),
                due_date: march(15),
            }))
            .unwrap();

        assert_eq!(rendered.subject, "You have borrowed: Dune");
        assert!(rendered.html.contains("Dear Ada Lovelace,"));
        assert!(rendered.html.contains("borrowed the following book from Central Library:"));
        assert!(rendered.html.contains("March 15, 2025"));
        assert!(rendered.text.contains("Due Date: March 15, 2025"));
        assert!(rendered.text.contains("by Frank Herbert"));
    }

    #[test]
    fn test_subjects_per_kind() {
        let engine = TemplateEngine::new().unwrap();
        let cases = [
            (NotificationPayload::BookReturned { details: details() }, "Book returned: Dune"),
            (
                NotificationPayload::BookExtended {
                    details: details(),
                    new_due_date: march(22),
                },
                "Borrowing extended: Dune",
            ),
            (
                NotificationPayload::DueReminder {
                    details: details(),
                    due_date: march(15),
                },
                "Reminder: Dune is due tomorrow",
            ),
            (
                NotificationPayload::OverdueReminder {
                    details: details(),
                    due_date: march(1),
                    days_overdue: 3,
                },
                "OVERDUE: Dune needs to be returned",
            ),
        ];

        for (payload, subject) in cases {
            assert_eq!(engine.render(&job(payload)).unwrap().subject, subject);
        }
    }

    #[test]
    fn test_extended_email_mentions_single_extension() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(&job(NotificationPayload::BookExtended {
                details: details(),
                new_due_date: march(22),
            }))
            .unwrap();

        assert!(rendered.html.contains("New Due Date"));
        assert!(rendered.html.contains("March 22, 2025"));
        assert!(rendered.text.contains("Extensions can only be granted once per borrowing."));
    }

    #[test]
    fn test_overdue_pluralisation() {
        let engine = TemplateEngine::new().unwrap();
        let render = |days| {
            engine
                .render(&job(NotificationPayload::OverdueReminder {
                    details: details(),
                    due_date: march(1),
                    days_overdue: days,
                }))
                .unwrap()
        };

        assert!(render(1).text.contains("Overdue By: 1 day\n"));
        assert!(render(4).text.contains("Overdue By: 4 days"));
        assert!(render(0).text.contains("Overdue By: 1 day\n"));
        assert!(render(4).html.contains("Originally due: March 1, 2025"));
    }

    #[test]
    fn test_blank_fields_use_placeholders() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(&job(NotificationPayload::BookReturned {
                details: LoanDetails::default(),
            }))
            .unwrap();

        assert_eq!(rendered.subject, "Book returned: Book Title");
        assert!(rendered.text.contains("Dear Member,"));
        assert!(rendered.text.contains("by Author Name"));
        assert!(rendered.text.contains("- Library"));
    }

    #[test]
    fn test_html_is_escaped_but_text_is_not() {
        let engine = TemplateEngine::new().unwrap();
        let mut loan = details();
        loan.book_title = "Tom & Jerry <Collected>".to_string();

        let rendered = engine
            .render(&job(NotificationPayload::BookReturned { details: loan }))
            .unwrap();

        assert!(rendered.html.contains("Tom &amp; Jerry &lt;Collected&gt;"));
        assert!(rendered.text.contains("Tom & Jerry <Collected>"));
    }
}
