//! Mailbox provider integration — reading, flagging, and raw sending.

pub mod gmail;

pub use gmail::GmailClient;

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::model::EmailData;

/// Mailbox operations the pipeline depends on. The production
/// implementation is `GmailClient`; tests substitute mocks.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// List and fetch unread messages, newest batch first, up to `max`.
    /// Retried internally; an error here means retries were exhausted.
    async fn fetch_unread(&self, max: usize) -> Result<Vec<EmailData>, MailboxError>;

    /// Clear the unread flag. Callers treat failure as best-effort.
    async fn mark_as_read(&self, message_id: &str) -> Result<(), MailboxError>;

    /// Send a plain-text message through the provider.
    async fn send_message(&self, to: &str, subject: &str, body: &str)
        -> Result<(), MailboxError>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> Result<(), MailboxError>;
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Disk</b> at <i>97%</i></div>"),
            "Disk at 97%"
        );
    }

    #[test]
    fn strip_html_with_attributes() {
        assert_eq!(
            strip_html(r#"<a href="https://status.example.com">status page</a>"#),
            "status page"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  job   failed  </p>"), "job failed");
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("No HTML here"), "No HTML here");
    }
}
