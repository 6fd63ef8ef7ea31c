//! Shared types for the alert processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Action type ─────────────────────────────────────────────────────

/// Remediation category assigned by the classifier.
///
/// The wire form is the exact literal the classifier is instructed to
/// emit — `"Re-hit"`, `"Backend"`, `"Code"` — and the same literal is what
/// lands in the audit store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Transient issue — resolve by retrying the failed process.
    #[serde(rename = "Re-hit")]
    ReHit,
    /// Infrastructure or configuration issue.
    Backend,
    /// Software bug requiring development intervention.
    Code,
}

impl ActionType {
    /// The literal used in prompts, routing, and the audit store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReHit => "Re-hit",
            Self::Backend => "Backend",
            Self::Code => "Code",
        }
    }

    /// Parse the exact wire literal. Anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Re-hit" => Some(Self::ReHit),
            "Backend" => Some(Self::Backend),
            "Code" => Some(Self::Code),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Email data ──────────────────────────────────────────────────────

/// A fetched alert email, immutable once read from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailData {
    /// Provider-assigned unique message id.
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// Plain text body, HTML stripped.
    pub body: String,
    pub received_date: DateTime<Utc>,
    /// Provider label tags (e.g. "INBOX", "UNREAD").
    #[serde(default)]
    pub labels: Vec<String>,
}

// ── LLM analysis ────────────────────────────────────────────────────

/// Classifier verdict for one email.
///
/// Only the classifier's parser constructs this, so the invariants hold by
/// construction: `reason` is trimmed non-empty, `confidence` is within
/// `[0.0, 1.0]` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub action: ActionType,
    pub reason: String,
    pub confidence: Option<f64>,
}

impl LlmAnalysis {
    /// Human-readable confidence bucket for summary rendering.
    pub fn confidence_label(&self) -> &'static str {
        match self.confidence {
            Some(c) if c > 0.8 => "high",
            Some(c) if c > 0.6 => "medium",
            Some(_) => "low",
            None => "unknown",
        }
    }
}

// ── Summary email ───────────────────────────────────────────────────

/// Rendered summary delivered to the responsible team. Transient — derived
/// from the original email and its analysis, never persisted.
#[derive(Debug, Clone)]
pub struct SummaryEmail {
    pub subject: String,
    pub body: String,
    pub recipient: String,
    pub action_type: ActionType,
    pub original_alert_subject: String,
}

impl SummaryEmail {
    /// Render the team-facing summary for an analyzed alert.
    pub fn from_analysis(original: &EmailData, analysis: &LlmAnalysis, recipient: &str) -> Self {
        let subject = format!("Alert Analysis - Action Required: {}", analysis.action);

        let confidence = analysis
            .confidence
            .map(|c| format!("{} ({:.2})", analysis.confidence_label(), c))
            .unwrap_or_else(|| "unknown".to_string());

        let body = format!(
            "ALERT ANALYSIS SUMMARY\n\
             \n\
             Original Alert:\n\
             - Subject: {subject}\n\
             - Sender: {sender}\n\
             - Received: {received}\n\
             \n\
             Recommended Action: {action}\n\
             Confidence: {confidence}\n\
             \n\
             Reasoning:\n\
             {reason}\n\
             \n\
             Original Alert Content:\n\
             {body}\n\
             \n\
             Please take appropriate action based on the analysis above.\n\
             \n\
             ---\n\
             This summary was automatically generated by AlertIQ.\n",
            subject = original.subject,
            sender = original.sender,
            received = original.received_date.to_rfc2822(),
            action = analysis.action,
            confidence = confidence,
            reason = analysis.reason,
            body = original.body,
        );

        Self {
            subject,
            body,
            recipient: recipient.to_string(),
            action_type: analysis.action,
            original_alert_subject: original.subject.clone(),
        }
    }
}

// ── Processed email record ──────────────────────────────────────────

/// One audit row describing the outcome of a single processing attempt.
///
/// Field order matches the audit store's column order exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEmail {
    /// Generated record id.
    pub id: Uuid,
    /// Natural key for duplicate detection.
    pub original_message_id: String,
    pub original_subject: String,
    pub original_sender: String,
    pub processed_at: DateTime<Utc>,
    pub action_taken: ActionType,
    pub reason: String,
    pub sent_to_team: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ProcessedEmail {
    /// Record a successfully routed alert.
    pub fn succeeded(original: &EmailData, analysis: &LlmAnalysis, sent_to_team: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_message_id: original.message_id.clone(),
            original_subject: original.subject.clone(),
            original_sender: original.sender.clone(),
            processed_at: Utc::now(),
            action_taken: analysis.action,
            reason: analysis.reason.clone(),
            sent_to_team: sent_to_team.to_string(),
            success: true,
            error_message: None,
        }
    }

    /// Record a failed processing attempt.
    pub fn failed(
        original: &EmailData,
        action_taken: ActionType,
        reason: &str,
        sent_to_team: &str,
        error_message: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_message_id: original.message_id.clone(),
            original_subject: original.subject.clone(),
            original_sender: original.sender.clone(),
            processed_at: Utc::now(),
            action_taken,
            reason: reason.to_string(),
            sent_to_team: sent_to_team.to_string(),
            success: false,
            error_message: Some(error_message.to_string()),
        }
    }
}

// ── Cycle report ────────────────────────────────────────────────────

/// Aggregate counters for one fetch→classify→route→send→record cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Unread messages dropped because a record with the same message id
    /// already exists.
    pub skipped: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn begin() -> Self {
        Self {
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark the cycle finished and stamp the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
            .num_milliseconds() as f64
            / 1000.0
    }
}
