//! Alert classifier — asks the LLM for a remediation verdict.
//!
//! Flow:
//! 1. Build a fixed instructional prompt embedding the alert metadata and
//!    the three-way decision rubric
//! 2. Run the completion (transport errors retried with backoff)
//! 3. Parse a strict JSON object out of the free-form response
//!
//! Parse failures are permanent per-item failures: `analyze` returns `None`
//! and the caller routes the alert down its failure path. Nothing here
//! panics or propagates an error.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::ClassifierError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::{ActionType, EmailData, LlmAnalysis};
use crate::retry::{self, BackoffPolicy};

/// Max tokens for the analysis call — a verdict is a short JSON object.
const ANALYSIS_MAX_TOKENS: u32 = 512;

/// Temperature for analysis (deterministic-ish).
const ANALYSIS_TEMPERATURE: f32 = 0.1;

/// Confidence assigned when the model omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Classifier client wrapping an LLM provider.
pub struct AlertClassifier {
    llm: Arc<dyn LlmProvider>,
    backoff: BackoffPolicy,
}

impl AlertClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, backoff: BackoffPolicy) -> Self {
        Self { llm, backoff }
    }

    /// Model identifier of the underlying provider, for logging.
    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Analyze one alert. `None` means the item permanently failed
    /// classification — transport retries have already happened here.
    pub async fn analyze(&self, email: &EmailData) -> Option<LlmAnalysis> {
        info!(message_id = %email.message_id, subject = %email.subject, "Analyzing alert email");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(email)),
        ])
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        let response = retry::with_backoff_if(
            &self.backoff,
            "classifier completion",
            ClassifierError::is_retryable,
            || self.llm.complete(request.clone()),
        )
        .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!(message_id = %email.message_id, error = %e, "Classifier call failed");
                return None;
            }
        };

        match parse_analysis(&response.content) {
            Ok(analysis) => {
                info!(
                    message_id = %email.message_id,
                    action = analysis.action.as_str(),
                    confidence = analysis.confidence,
                    "Analysis complete"
                );
                Some(analysis)
            }
            Err(e) => {
                warn!(
                    message_id = %email.message_id,
                    raw_response = %response.content,
                    error = %e,
                    "Could not parse classifier response"
                );
                None
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are an expert system administrator analyzing alert emails to determine \
     the appropriate remediation.\n\n\
     Based on the alert content, determine ONE of these three actions:\n\n\
     1. \"Re-hit\" - a temporary issue that can be resolved by retrying the process.\n   \
     Examples: timeout errors, temporary network issues, rate limiting, temporary \
     service unavailability.\n\n\
     2. \"Backend\" - a backend infrastructure or configuration issue.\n   \
     Examples: database connection issues, server errors, service configuration \
     problems, resource exhaustion.\n\n\
     3. \"Code\" - a software bug that requires development intervention.\n   \
     Examples: application errors, logic bugs, null pointer exceptions, syntax \
     errors, failed deployments.\n\n\
     Respond with ONLY a JSON object in exactly this format:\n\
     {\"action\": \"Re-hit\" | \"Backend\" | \"Code\", \"reason\": \"2-3 sentence \
     explanation of why this action was chosen\", \"confidence\": 0.85}\n\n\
     Rules:\n\
     - The action must be exactly one of: \"Re-hit\", \"Backend\", or \"Code\"\n\
     - The reason should be clear and actionable\n\
     - Confidence must be between 0.0 and 1.0\n\
     - Focus on the technical indicators in the alert"
        .to_string()
}

fn build_user_prompt(email: &EmailData) -> String {
    format!(
        "Analyze this alert email:\n\n\
         Subject: {}\n\
         Sender: {}\n\
         Received: {}\n\n\
         Body:\n{}",
        email.subject,
        email.sender,
        email.received_date.to_rfc2822(),
        email.body,
    )
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    action: Option<String>,
    reason: Option<String>,
    confidence: Option<f64>,
}

/// Parse the model output into an analysis.
///
/// Policy: take the substring from the first `{` to the last `}`, parse it
/// as JSON, require `action` and `reason`, reject unknown actions and
/// out-of-range confidence, default confidence to 0.8 when absent.
fn parse_analysis(raw: &str) -> Result<LlmAnalysis, ClassifierError> {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            return Err(ClassifierError::InvalidResponse {
                reason: "no JSON object in response".to_string(),
            });
        }
    };

    let parsed: AnalysisResponse = serde_json::from_str(&raw[start..=end])?;

    let action = parsed.action.ok_or_else(|| ClassifierError::InvalidResponse {
        reason: "missing 'action' field".to_string(),
    })?;
    let action = ActionType::parse(&action).ok_or_else(|| ClassifierError::InvalidResponse {
        reason: format!("invalid action type: '{action}'"),
    })?;

    let reason = parsed
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ClassifierError::InvalidResponse {
            reason: "missing or empty 'reason' field".to_string(),
        })?
        .to_string();

    let confidence = parsed.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ClassifierError::InvalidResponse {
            reason: format!("confidence {confidence} out of range"),
        });
    }

    Ok(LlmAnalysis {
        action,
        reason,
        confidence: Some(confidence),
    })
}
