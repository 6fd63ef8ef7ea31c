//! Notification sender — delivers team summaries and error notices.
//!
//! Two interchangeable transports, picked at construction: the mailbox
//! API (default) or direct SMTP. Both produce a single-part plain-text
//! message. Sends are retried with the shared backoff policy.

use std::sync::Arc;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{error, info};

use crate::config::{SmtpConfig, TeamRouting};
use crate::error::NotifyError;
use crate::mailbox::Mailbox;
use crate::model::{EmailData, SummaryEmail};
use crate::retry::{self, BackoffPolicy};

/// Outbound transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTransport {
    /// Send through the mailbox provider's raw-message API.
    MailboxApi,
    /// Send through the SMTP fallback.
    Smtp,
}

/// Sends rendered summaries to team mailboxes.
pub struct SummaryMailer {
    transport: SendTransport,
    mailbox: Arc<dyn Mailbox>,
    smtp: SmtpConfig,
    teams: TeamRouting,
    backoff: BackoffPolicy,
}

impl SummaryMailer {
    pub fn new(
        transport: SendTransport,
        mailbox: Arc<dyn Mailbox>,
        smtp: SmtpConfig,
        teams: TeamRouting,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            transport,
            mailbox,
            smtp,
            teams,
            backoff,
        }
    }

    pub fn transport(&self) -> SendTransport {
        self.transport
    }

    /// Deliver a summary, retrying transient transport failures.
    pub async fn send_summary(&self, summary: &SummaryEmail) -> Result<(), NotifyError> {
        retry::with_backoff(&self.backoff, "summary send", || self.send_once(summary)).await?;
        info!(
            recipient = %summary.recipient,
            action = summary.action_type.as_str(),
            "Summary email sent"
        );
        Ok(())
    }

    async fn send_once(&self, summary: &SummaryEmail) -> Result<(), NotifyError> {
        match self.transport {
            SendTransport::MailboxApi => {
                self.mailbox
                    .send_message(&summary.recipient, &summary.subject, &summary.body)
                    .await?;
                Ok(())
            }
            SendTransport::Smtp => {
                self.send_via_smtp(&summary.recipient, &summary.subject, &summary.body)
            }
        }
    }

    /// Send an email via SMTP with STARTTLS and login auth.
    fn send_via_smtp(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let creds = Credentials::new(
            self.smtp.username.clone(),
            self.smtp.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::starttls_relay(&self.smtp.server)
            .map_err(|e| NotifyError::Smtp(format!("SMTP relay error: {e}")))?
            .port(self.smtp.port)
            .credentials(creds)
            .build();

        let email = lettre::Message::builder()
            .from(
                self.smtp
                    .username
                    .parse()
                    .map_err(|e| NotifyError::InvalidAddress {
                        address: self.smtp.username.clone(),
                        reason: format!("{e}"),
                    })?,
            )
            .to(to.parse().map_err(|e| NotifyError::InvalidAddress {
                address: to.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::MessageBuild(e.to_string()))?;

        transport
            .send(&email)
            .map_err(|e| NotifyError::Smtp(format!("SMTP send failed: {e}")))?;

        Ok(())
    }

    /// Best-effort error notification to the fallback team. Its own failure
    /// is logged, never propagated.
    pub async fn send_error_notification(
        &self,
        error_message: &str,
        original: &EmailData,
    ) -> bool {
        let notification =
            render_error_notification(error_message, original, self.teams.default_team());

        match self.send_summary(&notification).await {
            Ok(()) => {
                info!(message_id = %original.message_id, "Error notification sent");
                true
            }
            Err(e) => {
                error!(
                    message_id = %original.message_id,
                    error = %e,
                    "Failed to send error notification"
                );
                false
            }
        }
    }

    /// Probe the configured transport.
    pub async fn test_connection(&self) -> bool {
        match self.transport {
            SendTransport::MailboxApi => match self.mailbox.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "Mailbox send transport check failed");
                    false
                }
            },
            SendTransport::Smtp => {
                let creds = Credentials::new(
                    self.smtp.username.clone(),
                    self.smtp.password.expose_secret().to_string(),
                );
                match SmtpTransport::starttls_relay(&self.smtp.server) {
                    Ok(builder) => {
                        let transport = builder.port(self.smtp.port).credentials(creds).build();
                        match transport.test_connection() {
                            Ok(ok) => ok,
                            Err(e) => {
                                error!(error = %e, "SMTP connection test failed");
                                false
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "SMTP relay setup failed");
                        false
                    }
                }
            }
        }
    }
}

/// Render the notice sent to the fallback team when processing fails.
fn render_error_notification(
    error_message: &str,
    original: &EmailData,
    recipient: &str,
) -> SummaryEmail {
    let subject = format!("Alert Processing Error - {}", original.subject);

    let body = format!(
        "An error occurred while processing the following alert email:\n\
         \n\
         Original Alert Subject: {subject}\n\
         Original Sender: {sender}\n\
         Received: {received}\n\
         Message ID: {message_id}\n\
         \n\
         Error Details:\n\
         {error}\n\
         \n\
         Please review the alert manually and take appropriate action.\n\
         \n\
         ---\n\
         This error notification was automatically generated by AlertIQ.\n",
        subject = original.subject,
        sender = original.sender,
        received = original.received_date.to_rfc2822(),
        message_id = original.message_id,
        error = error_message,
    );

    SummaryEmail {
        subject,
        body,
        recipient: recipient.to_string(),
        action_type: crate::model::ActionType::Backend,
        original_alert_subject: original.subject.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::error::MailboxError;
    use crate::model::ActionType;

    fn sample_email() -> EmailData {
        EmailData {
            message_id: "msg_404".into(),
            subject: "Alert: queue backlog".into(),
            sender: "monitoring@company.com".into(),
            body: "Backlog above threshold".into(),
            received_date: Utc::now(),
            labels: vec![],
        }
    }

    fn teams() -> TeamRouting {
        TeamRouting {
            backend: "backend@company.com".into(),
            code: "dev@company.com".into(),
            rehit: "ops@company.com".into(),
        }
    }

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".into(),
            port: 587,
            username: "bot@example.com".into(),
            password: String::from("pw").into(),
        }
    }

    /// Mock mailbox that fails the first `fail_first` sends.
    struct MockMailbox {
        fail_first: u32,
        sends: AtomicU32,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl MockMailbox {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                sends: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Mailbox for MockMailbox {
        async fn fetch_unread(&self, _max: usize) -> Result<Vec<EmailData>, MailboxError> {
            Ok(vec![])
        }

        async fn mark_as_read(&self, _message_id: &str) -> Result<(), MailboxError> {
            Ok(())
        }

        async fn send_message(
            &self,
            to: &str,
            subject: &str,
            _body: &str,
        ) -> Result<(), MailboxError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(MailboxError::RequestFailed {
                    reason: "temporary outage".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }

        async fn health_check(&self) -> Result<(), MailboxError> {
            Ok(())
        }
    }

    fn mailer(mailbox: Arc<MockMailbox>) -> SummaryMailer {
        SummaryMailer::new(
            SendTransport::MailboxApi,
            mailbox,
            smtp(),
            teams(),
            BackoffPolicy::new(3, Duration::ZERO),
        )
    }

    #[test]
    fn error_notification_rendering() {
        let email = sample_email();
        let notice = render_error_notification("LLM analysis failed", &email, "backend@company.com");
        assert_eq!(notice.recipient, "backend@company.com");
        assert_eq!(notice.action_type, ActionType::Backend);
        assert!(notice.subject.contains("Alert Processing Error - Alert: queue backlog"));
        assert!(notice.body.contains("LLM analysis failed"));
        assert!(notice.body.contains("msg_404"));
        assert!(notice.body.contains("monitoring@company.com"));
    }

    #[tokio::test]
    async fn summary_send_goes_through_mailbox_api() {
        let mailbox = Arc::new(MockMailbox::new(0));
        let mailer = mailer(mailbox.clone());

        let summary = SummaryEmail {
            subject: "Alert Analysis - Action Required: Code".into(),
            body: "details".into(),
            recipient: "dev@company.com".into(),
            action_type: ActionType::Code,
            original_alert_subject: "Alert".into(),
        };

        mailer.send_summary(&summary).await.unwrap();
        let sent = mailbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dev@company.com");
    }

    #[tokio::test]
    async fn summary_send_retries_transient_failures() {
        let mailbox = Arc::new(MockMailbox::new(2));
        let mailer = mailer(mailbox.clone());

        let summary = SummaryEmail {
            subject: "s".into(),
            body: "b".into(),
            recipient: "ops@company.com".into(),
            action_type: ActionType::ReHit,
            original_alert_subject: "Alert".into(),
        };

        mailer.send_summary(&summary).await.unwrap();
        assert_eq!(mailbox.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn summary_send_gives_up_after_budget() {
        let mailbox = Arc::new(MockMailbox::new(10));
        let mailer = mailer(mailbox.clone());

        let summary = SummaryEmail {
            subject: "s".into(),
            body: "b".into(),
            recipient: "ops@company.com".into(),
            action_type: ActionType::ReHit,
            original_alert_subject: "Alert".into(),
        };

        assert!(mailer.send_summary(&summary).await.is_err());
        assert_eq!(mailbox.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn error_notification_is_best_effort() {
        let mailbox = Arc::new(MockMailbox::new(10));
        let mailer = mailer(mailbox.clone());
        assert!(!mailer.send_error_notification("boom", &sample_email()).await);

        let mailbox = Arc::new(MockMailbox::new(0));
        let mailer = self::mailer(mailbox.clone());
        assert!(mailer.send_error_notification("boom", &sample_email()).await);
        let sent = mailbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "backend@company.com");
    }
}
