//! Gemini text-completion client over the REST API.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::LlmSettings;
use crate::error::ClassifierError;
use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, MessageRole,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiClient {
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/{}:generateContent", self.model)
    }
}

/// Assemble the `generateContent` request body. System messages become the
/// system instruction, user messages become content turns.
fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let system_text: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents: Vec<serde_json::Value> = request
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| json!({ "role": "user", "parts": [{ "text": m.content }] }))
        .collect();

    let mut body = json!({ "contents": contents });

    if !system_text.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system_text.join("\n\n") }] });
    }

    let mut generation = serde_json::Map::new();
    if let Some(t) = request.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(max) = request.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max));
    }
    if !generation.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(generation);
    }

    body
}

// ── Response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let parts = &candidate.content.as_ref()?.parts;
    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() { None } else { Some(text) }
}

fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

#[async_trait::async_trait]
impl LlmProvider for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ClassifierError> {
        let body = build_request_body(&request);

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::RequestFailed {
                provider: "gemini".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassifierError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("status {status}: {detail}"),
            });
        }

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| ClassifierError::RequestFailed {
                    provider: "gemini".to_string(),
                    reason: format!("response decode failed: {e}"),
                })?;

        let content = extract_text(&parsed).ok_or_else(|| ClassifierError::EmptyResponse {
            provider: "gemini".to_string(),
        })?;

        let finish_reason = map_finish_reason(
            parsed
                .candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref()),
        );

        let (input_tokens, output_tokens) = parsed
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn request_body_splits_system_and_user() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are a classifier."),
            ChatMessage::user("Classify this alert."),
        ])
        .with_temperature(0.1)
        .with_max_tokens(512);

        let body = build_request_body(&request);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are a classifier."
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Classify this alert.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn request_body_omits_empty_sections() {
        let request = CompletionRequest::new(vec![ChatMessage::user("hello")]);
        let body = build_request_body(&request);
        assert!(body.get("systemInstruction").is_none());
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn response_text_joined_from_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"action\"" }, { "text": ": \"Backend\"}" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 120, "candidatesTokenCount": 30 }
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(extract_text(&parsed).as_deref(), Some("{\"action\": \"Backend\"}"));
        assert_eq!(
            map_finish_reason(parsed.candidates[0].finish_reason.as_deref()),
            FinishReason::Stop
        );
    }

    #[test]
    fn empty_candidates_yield_no_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert!(extract_text(&parsed).is_none());
    }
}
