//! Cycle orchestrator — fetch → classify → route → send → record.
//!
//! Per-item failures never abort a cycle; only a fetch-stage failure does,
//! and that is recorded as a critical error on the report. A failed item
//! still gets an audit row, which makes later cycles treat the message as
//! already processed (duplicate-skip) — there are no retries across cycle
//! boundaries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audit::{AuditLog, AuditStats};
use crate::classifier::AlertClassifier;
use crate::config::{AppConfig, TeamRouting};
use crate::error::Error;
use crate::llm::GeminiClient;
use crate::mailbox::{GmailClient, Mailbox};
use crate::model::{ActionType, CycleReport, EmailData, ProcessedEmail, SummaryEmail};
use crate::notify::{SendTransport, SummaryMailer};
use crate::retry::BackoffPolicy;

/// Reason string recorded when classification fails.
const ANALYSIS_FAILED: &str = "LLM analysis failed";

/// Per-component connectivity test results.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionReport {
    pub mailbox: bool,
    pub classifier: bool,
    pub sender: bool,
    pub audit: bool,
}

impl ConnectionReport {
    pub fn all_ok(&self) -> bool {
        self.mailbox && self.classifier && self.sender && self.audit
    }

    /// (component, healthy) pairs for display.
    pub fn components(&self) -> [(&'static str, bool); 4] {
        [
            ("mailbox", self.mailbox),
            ("classifier", self.classifier),
            ("sender", self.sender),
            ("audit store", self.audit),
        ]
    }
}

/// The alert processing orchestrator.
pub struct AlertProcessor {
    mailbox: Arc<dyn Mailbox>,
    classifier: AlertClassifier,
    mailer: SummaryMailer,
    audit: AuditLog,
    teams: TeamRouting,
    batch_size: usize,
}

impl AlertProcessor {
    /// Wire up the real clients from configuration. Audit-store creation
    /// failure is fatal here.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let backoff = BackoffPolicy::new(
            config.processing.retry_attempts,
            Duration::from_secs(config.processing.retry_delay_seconds),
        );

        let gmail = Arc::new(GmailClient::new(
            config.gmail.clone(),
            config.smtp.username.clone(),
            backoff,
        ));

        let llm = Arc::new(GeminiClient::new(&config.llm));
        let classifier = AlertClassifier::new(llm, backoff);

        let transport = if config.smtp_fallback {
            SendTransport::Smtp
        } else {
            SendTransport::MailboxApi
        };
        let mailer = SummaryMailer::new(
            transport,
            gmail.clone(),
            config.smtp.clone(),
            config.teams.clone(),
            backoff,
        );

        let audit = AuditLog::new(&config.audit_path)?;

        Ok(Self {
            mailbox: gmail,
            classifier,
            mailer,
            audit,
            teams: config.teams.clone(),
            batch_size: config.processing.max_emails_per_batch,
        })
    }

    /// Construct from parts — the seam the tests use with mock
    /// mailbox/provider implementations.
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: AlertClassifier,
        mailer: SummaryMailer,
        audit: AuditLog,
        teams: TeamRouting,
        batch_size: usize,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            mailer,
            audit,
            teams,
            batch_size,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one full processing cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::begin();
        info!("Starting alert email processing cycle");

        let emails = match self.mailbox.fetch_unread(self.batch_size).await {
            Ok(emails) => emails,
            Err(e) => {
                let message = format!("Critical error in alert processing: {e}");
                error!("{message}");
                report.errors.push(message);
                report.finish();
                return report;
            }
        };

        if emails.is_empty() {
            info!("No unread emails found");
            report.finish();
            return report;
        }

        let fetched = emails.len();
        let to_process: Vec<EmailData> = emails
            .into_iter()
            .filter(|email| {
                if self.audit.check_duplicate(&email.message_id) {
                    info!(subject = %email.subject, "Skipping already processed email");
                    false
                } else {
                    true
                }
            })
            .collect();
        report.skipped = fetched - to_process.len();

        if to_process.is_empty() {
            info!("All fetched emails were already processed");
            report.finish();
            return report;
        }

        info!(count = to_process.len(), "Processing new emails");

        for email in &to_process {
            report.processed += 1;
            match self.process_single(email).await {
                Ok(()) => {
                    report.successful += 1;
                    if let Err(e) = self.mailbox.mark_as_read(&email.message_id).await {
                        warn!(message_id = %email.message_id, error = %e, "Could not mark message as read");
                    }
                }
                Err(message) => {
                    report.failed += 1;
                    report.errors.push(message);
                }
            }
        }

        report.finish();
        self.log_summary(&report);
        report
    }

    /// Process one email. `Err` carries the per-item error string for the
    /// cycle report; an audit row has already been written either way.
    async fn process_single(&self, email: &EmailData) -> Result<(), String> {
        info!(subject = %email.subject, "Processing email");

        let Some(analysis) = self.classifier.analyze(email).await else {
            error!(message_id = %email.message_id, "Classification failed");
            self.mailer
                .send_error_notification(ANALYSIS_FAILED, email)
                .await;
            self.audit.append(&ProcessedEmail::failed(
                email,
                ActionType::Backend,
                ANALYSIS_FAILED,
                self.teams.default_team(),
                ANALYSIS_FAILED,
            ));
            return Err(format!("{}: {ANALYSIS_FAILED}", email.message_id));
        };

        let recipient = self.teams.address_for(Some(analysis.action));
        let summary = SummaryEmail::from_analysis(email, &analysis, recipient);

        if let Err(e) = self.mailer.send_summary(&summary).await {
            error!(message_id = %email.message_id, error = %e, "Failed to send summary email");
            self.audit.append(&ProcessedEmail::failed(
                email,
                analysis.action,
                &analysis.reason,
                recipient,
                "Failed to send summary email",
            ));
            return Err(format!("{}: failed to send summary email", email.message_id));
        }

        self.audit
            .append(&ProcessedEmail::succeeded(email, &analysis, recipient));

        info!(
            message_id = %email.message_id,
            action = analysis.action.as_str(),
            "Successfully processed email"
        );
        Ok(())
    }

    fn log_summary(&self, report: &CycleReport) {
        info!(
            processed = report.processed,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            duration_secs = format!("{:.2}", report.duration_seconds()),
            "Processing cycle complete"
        );
        for err in &report.errors {
            error!("Cycle error: {err}");
        }
    }

    /// Exercise each external dependency.
    pub async fn test_connections(&self) -> ConnectionReport {
        let mailbox = match self.mailbox.health_check().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Mailbox connection test failed");
                false
            }
        };

        // The classifier provider has no free probe; a configured model
        // name is the same readiness signal the send path relies on.
        let classifier = !self.classifier.model_name().is_empty();

        let sender = self.mailer.test_connection().await;
        let audit = self.audit.path().exists();

        ConnectionReport {
            mailbox,
            classifier,
            sender,
            audit,
        }
    }

    /// Health gate used by one-shot runs and daemon startup.
    pub async fn run_health_check(&self) -> bool {
        info!("Running system health check");
        let report = self.test_connections().await;
        for (component, healthy) in report.components() {
            if healthy {
                info!(component, "health check ok");
            } else {
                error!(component, "health check FAILED");
            }
        }
        report.all_ok()
    }

    pub fn stats(&self) -> AuditStats {
        self.audit.stats()
    }

    pub fn cleanup_old_records(&self, days: u32) -> usize {
        self.audit.prune_older_than(days)
    }
}
