//! Gmail REST client — OAuth refresh-token auth, unread fetch, label
//! modification, and raw message send.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GmailAuthConfig;
use crate::error::MailboxError;
use crate::mailbox::{Mailbox, strip_html};
use crate::model::EmailData;
use crate::retry::{self, BackoffPolicy};

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const UNREAD_QUERY: &str = "is:unread in:inbox";

/// Refresh the cached access token this long before it actually expires.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

/// Gmail API client.
pub struct GmailClient {
    http: reqwest::Client,
    auth: GmailAuthConfig,
    /// Address stamped on outgoing messages.
    from_address: String,
    backoff: BackoffPolicy,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl GmailClient {
    pub fn new(auth: GmailAuthConfig, from_address: String, backoff: BackoffPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            from_address,
            backoff,
            token: RwLock::new(None),
        }
    }

    /// Current access token, refreshed through the OAuth refresh-token
    /// grant when missing or near expiry.
    async fn access_token(&self) -> Result<String, MailboxError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", self.auth.client_id.as_str()),
                ("client_secret", self.auth.client_secret.expose_secret()),
                ("refresh_token", self.auth.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MailboxError::AuthFailed {
                reason: format!("token refresh returned {status}: {detail}"),
            });
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = Utc::now()
            + Duration::seconds((token.expires_in as i64 - TOKEN_EXPIRY_SLACK_SECS).max(0));

        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        debug!("Refreshed mailbox access token");
        Ok(access_token)
    }

    /// One unretried fetch pass: list unread ids, then fetch each in full.
    async fn fetch_unread_once(&self, max: usize) -> Result<Vec<EmailData>, MailboxError> {
        let token = self.access_token().await?;

        let list: MessageList = self
            .http
            .get(format!("{API_BASE}/messages"))
            .bearer_auth(&token)
            .query(&[("q", UNREAD_QUERY), ("maxResults", &max.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let refs = list.messages.unwrap_or_default();
        info!(count = refs.len(), "Found unread emails");

        let mut emails = Vec::with_capacity(refs.len());
        for message_ref in refs {
            // One undecodable message must not sink the batch.
            match self.get_message(&token, &message_ref.id).await {
                Ok(email) => emails.push(email),
                Err(e) => {
                    warn!(message_id = %message_ref.id, error = %e, "Skipping unreadable message");
                }
            }
        }

        Ok(emails)
    }

    async fn get_message(&self, token: &str, id: &str) -> Result<EmailData, MailboxError> {
        let message: GmailMessage = self
            .http
            .get(format!("{API_BASE}/messages/{id}"))
            .bearer_auth(token)
            .query(&[("format", "full")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let payload = message.payload.ok_or_else(|| MailboxError::Decode {
            message_id: id.to_string(),
            reason: "message has no payload".to_string(),
        })?;

        let headers = payload.headers.as_deref().unwrap_or_default();
        let subject =
            header_value(headers, "Subject").unwrap_or_else(|| "No Subject".to_string());
        let sender =
            header_value(headers, "From").unwrap_or_else(|| "Unknown Sender".to_string());
        let received_date = parse_received_date(header_value(headers, "Date").as_deref());

        Ok(EmailData {
            message_id: message.id,
            subject,
            sender,
            body: extract_body(&payload),
            received_date,
            labels: message.label_ids.unwrap_or_default(),
        })
    }
}

#[async_trait::async_trait]
impl Mailbox for GmailClient {
    async fn fetch_unread(&self, max: usize) -> Result<Vec<EmailData>, MailboxError> {
        retry::with_backoff(&self.backoff, "mailbox fetch", || {
            self.fetch_unread_once(max)
        })
        .await
    }

    async fn mark_as_read(&self, message_id: &str) -> Result<(), MailboxError> {
        let token = self.access_token().await?;
        self.http
            .post(format!("{API_BASE}/messages/{message_id}/modify"))
            .bearer_auth(&token)
            .json(&json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await?
            .error_for_status()?;

        debug!(message_id, "Marked message as read");
        Ok(())
    }

    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailboxError> {
        let message = lettre::Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e| MailboxError::MessageBuild(format!("invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailboxError::MessageBuild(format!("invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailboxError::MessageBuild(e.to_string()))?;

        let raw = URL_SAFE.encode(message.formatted());

        let token = self.access_token().await?;
        self.http
            .post(format!("{API_BASE}/messages/send"))
            .bearer_auth(&token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?
            .error_for_status()?;

        info!(recipient = to, "Sent message via mailbox API");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailboxError> {
        let token = self.access_token().await?;
        self.http
            .get(format!("{API_BASE}/profile"))
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// ── Wire shapes ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    label_ids: Option<Vec<String>>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    headers: Option<Vec<Header>>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    body: Option<PartBody>,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

// ── Decoding helpers ────────────────────────────────────────────────

fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn parse_received_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Decode Gmail's base64url part data, tolerating both padded and unpadded
/// encodings.
fn decode_part_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Extract a plain-text body from the message payload.
///
/// Multipart: the first `text/plain` part wins; when none decodes, the
/// first `text/html` part is tag-stripped. Single-part bodies are used only
/// when the payload itself is `text/plain`.
fn extract_body(payload: &MessagePayload) -> String {
    let part_data = |part: &MessagePart| {
        part.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_part_data)
    };

    let body = if let Some(parts) = &payload.parts {
        let plain = parts
            .iter()
            .filter(|p| p.mime_type.as_deref() == Some("text/plain"))
            .find_map(&part_data);

        plain.or_else(|| {
            parts
                .iter()
                .filter(|p| p.mime_type.as_deref() == Some("text/html"))
                .find_map(&part_data)
                .map(|html| strip_html(&html))
        })
    } else if payload.mime_type.as_deref() == Some("text/plain") {
        payload
            .body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_part_data)
    } else {
        None
    };

    body.unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(text: &str) -> String {
        URL_SAFE.encode(text)
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![
            Header {
                name: "subject".into(),
                value: "Test Alert".into(),
            },
            Header {
                name: "From".into(),
                value: "test@example.com".into(),
            },
        ];
        assert_eq!(header_value(&headers, "Subject").as_deref(), Some("Test Alert"));
        assert_eq!(header_value(&headers, "FROM").as_deref(), Some("test@example.com"));
        assert_eq!(header_value(&headers, "Date"), None);
    }

    #[test]
    fn received_date_parses_rfc2822() {
        let parsed = parse_received_date(Some("Wed, 3 Sep 2025 10:30:00 +0000"));
        assert_eq!(parsed.to_rfc2822(), "Wed, 3 Sep 2025 10:30:00 +0000");
    }

    #[test]
    fn received_date_falls_back_to_now() {
        let before = Utc::now();
        let parsed = parse_received_date(Some("not a date"));
        assert!(parsed >= before);
        let parsed = parse_received_date(None);
        assert!(parsed >= before);
    }

    #[test]
    fn part_data_decodes_with_and_without_padding() {
        assert_eq!(decode_part_data(&b64("Test email body")).as_deref(), Some("Test email body"));
        let unpadded = URL_SAFE_NO_PAD.encode("Test email body");
        assert_eq!(decode_part_data(&unpadded).as_deref(), Some("Test email body"));
        assert_eq!(decode_part_data("!!not-base64!!"), None);
    }

    #[test]
    fn body_prefers_first_plain_text_part() {
        let payload = MessagePayload {
            mime_type: Some("multipart/alternative".into()),
            headers: None,
            body: None,
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("text/html".into()),
                    body: Some(PartBody {
                        data: Some(b64("<p>html variant</p>")),
                    }),
                },
                MessagePart {
                    mime_type: Some("text/plain".into()),
                    body: Some(PartBody {
                        data: Some(b64("plain variant")),
                    }),
                },
                MessagePart {
                    mime_type: Some("text/plain".into()),
                    body: Some(PartBody {
                        data: Some(b64("second plain variant")),
                    }),
                },
            ]),
        };
        assert_eq!(extract_body(&payload), "plain variant");
    }

    #[test]
    fn body_falls_back_to_stripped_html() {
        let payload = MessagePayload {
            mime_type: Some("multipart/alternative".into()),
            headers: None,
            body: None,
            parts: Some(vec![MessagePart {
                mime_type: Some("text/html".into()),
                body: Some(PartBody {
                    data: Some(b64("<b>Disk</b> full on <i>db-01</i>")),
                }),
            }]),
        };
        assert_eq!(extract_body(&payload), "Disk full on db-01");
    }

    #[test]
    fn single_part_plain_body() {
        let payload = MessagePayload {
            mime_type: Some("text/plain".into()),
            headers: None,
            body: Some(PartBody {
                data: Some(b64("Test email body")),
            }),
            parts: None,
        };
        assert_eq!(extract_body(&payload), "Test email body");
    }

    #[test]
    fn single_part_non_plain_yields_empty() {
        let payload = MessagePayload {
            mime_type: Some("text/html".into()),
            headers: None,
            body: Some(PartBody {
                data: Some(b64("<p>html only</p>")),
            }),
            parts: None,
        };
        assert_eq!(extract_body(&payload), "");
    }

    #[test]
    fn message_list_tolerates_missing_messages_key() {
        let list: MessageList = serde_json::from_str("{\"resultSizeEstimate\": 0}").unwrap();
        assert!(list.messages.is_none());
    }
}
