pub mod resend;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// False when no credentials are configured; sends are skipped, not failed.
    fn is_configured(&self) -> bool;

    async fn send(&self, email: &Email) -> anyhow::Result<()>;
}

/// Result of a best-effort send, reported back to the caller as-is.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailOutcome {
    pub ok: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl EmailOutcome {
    pub fn skipped(reason: &str) -> Self {
        Self {
            ok: false,
            skipped: true,
            error: Some(reason.to_string()),
        }
    }
}

/// Sends without ever failing the caller.
pub async fn send_best_effort(mailer: &dyn EmailSender, email: &Email) -> EmailOutcome {
    if !mailer.is_configured() {
        return EmailOutcome::skipped("Email is not configured.");
    }
    if email.to.trim().is_empty() {
        return EmailOutcome {
            ok: false,
            skipped: false,
            error: Some("Missing recipient email.".to_string()),
        };
    }

    match mailer.send(email).await {
        Ok(()) => EmailOutcome {
            ok: true,
            skipped: false,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, to = %email.to, "confirmation email failed");
            EmailOutcome {
                ok: false,
                skipped: false,
                error: Some(e.to_string()),
            }
        }
    }
}

pub struct BookingConfirmation<'a> {
    pub to: &'a str,
    pub customer_name: &'a str,
    pub space_title: &'a str,
    pub booking_date: &'a str,
    pub start_time: &'a str,
    pub end_time: &'a str,
    pub invoice_url: Option<&'a str>,
}

pub fn booking_confirmation(c: &BookingConfirmation) -> Email {
    let name = if c.customer_name.trim().is_empty() {
        "there".to_string()
    } else {
        escape_html(c.customer_name)
    };

    let invoice_link = c
        .invoice_url
        .map(|url| {
            format!(
                r#"<p><strong>Invoice:</strong> <a href="{}">View invoice</a></p>"#,
                escape_html(url)
            )
        })
        .unwrap_or_default();

    let html = format!(
        r#"<div style="font-family: ui-sans-serif, system-ui, sans-serif;">
  <h2 style="margin: 0 0 12px;">Booking confirmed</h2>
  <p style="margin: 0 0 12px;">Hi {name},</p>
  <p style="margin: 0 0 12px;">You're booked in for <strong>{room}</strong> on <strong>{date}</strong> ({start}&ndash;{end}).</p>
  {invoice_link}
  <p style="margin: 18px 0 0; color: #4b5563;">If you need to make a change, reply to this email and we'll help.</p>
</div>"#,
        room = escape_html(c.space_title),
        date = escape_html(c.booking_date),
        start = escape_html(c.start_time),
        end = escape_html(c.end_time),
    );

    Email {
        to: c.to.trim().to_string(),
        subject: format!("Booking confirmed: {} on {}", c.space_title, c.booking_date),
        html,
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
