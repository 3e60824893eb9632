//! Telegram Bot API sender — one delivery attempt, classified.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use autopost_core::config::TelegramConfig;
use autopost_core::error::{AutopostError, Result};
use autopost_core::task::{Destination, Payload, SendOutcome};
use autopost_core::traits::Sender;
use serde::Deserialize;

/// Fallback flood wait when the API rate-limits without a `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Delivers payloads via the Telegram Bot API.
pub struct TelegramSender {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    /// Validate the token at startup and report the bot identity.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| AutopostError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| AutopostError::Channel(format!("Invalid getMe response: {e}")))?;
        body.result
            .ok_or_else(|| AutopostError::Channel("No bot info".into()))
    }

    async fn send_text(&self, destination: &Destination, text: &str) -> SendOutcome {
        let mut body = serde_json::json!({
            "chat_id": destination.chat,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(topic) = destination.topic() {
            body["message_thread_id"] = topic.into();
        }

        let response = match self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::Transient {
                    reason: format!("sendMessage failed: {e}"),
                };
            }
        };
        outcome_from_response(response).await
    }

    /// Photo with the text as caption, uploaded as multipart form data.
    async fn send_photo(&self, destination: &Destination, text: &str, path: &Path) -> SendOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return SendOutcome::Transient {
                    reason: format!("attachment {} unreadable: {e}", path.display()),
                };
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".into());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", destination.chat.clone())
            .text("caption", text.to_string())
            .text("parse_mode", "HTML")
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if let Some(topic) = destination.topic() {
            form = form.text("message_thread_id", topic.to_string());
        }

        let response = match self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .timeout(Duration::from_secs(60))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::Transient {
                    reason: format!("sendPhoto failed: {e}"),
                };
            }
        };
        outcome_from_response(response).await
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, destination: &Destination, payload: &Payload) -> SendOutcome {
        match &payload.attachment {
            Some(path) => self.send_photo(destination, &payload.text, path).await,
            None => self.send_text(destination, &payload.text).await,
        }
    }
}

async fn outcome_from_response(response: reqwest::Response) -> SendOutcome {
    let status = response.status().as_u16();
    match response.json::<TelegramApiResponse<serde_json::Value>>().await {
        Ok(body) => classify(status, &body),
        Err(e) => SendOutcome::Transient {
            reason: format!("invalid API response: {e}"),
        },
    }
}

/// Map an API response onto the engine's outcome taxonomy.
///
/// 429 with `retry_after` is the Bot API flood wait; `SLOWMODE_WAIT_N`
/// descriptions come from MTProto-style relays and carry their own wait.
/// 401/403 mean the token was revoked or the bot was kicked — not
/// recoverable without the operator, so the task gets parked.
fn classify(status: u16, body: &TelegramApiResponse<serde_json::Value>) -> SendOutcome {
    if body.ok {
        return SendOutcome::Success;
    }
    let description = body.description.clone().unwrap_or_default();

    if let Some(secs) = parse_slowmode_wait(&description) {
        return SendOutcome::SlowMode {
            retry_after_secs: secs,
        };
    }

    if status == 429 || description.contains("Too Many Requests") {
        let retry_after_secs = body
            .parameters
            .as_ref()
            .and_then(|p| p.retry_after)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return SendOutcome::RateLimited { retry_after_secs };
    }

    if status == 401 || status == 403 || description.contains("chat not found") {
        return SendOutcome::Fatal {
            reason: format!("API error {status}: {description}"),
        };
    }

    SendOutcome::Transient {
        reason: format!("API error {status}: {description}"),
    }
}

fn parse_slowmode_wait(description: &str) -> Option<u64> {
    let rest = description.split("SLOWMODE_WAIT_").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// --- Telegram API types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TelegramApiResponse<serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_ok() {
        let body = response(r#"{"ok": true, "result": {"message_id": 1}}"#);
        assert_eq!(classify(200, &body), SendOutcome::Success);
    }

    #[test]
    fn test_classify_flood_wait() {
        let body = response(
            r#"{"ok": false, "error_code": 429,
                "description": "Too Many Requests: retry after 23",
                "parameters": {"retry_after": 23}}"#,
        );
        assert_eq!(
            classify(429, &body),
            SendOutcome::RateLimited {
                retry_after_secs: 23
            }
        );
    }

    #[test]
    fn test_classify_flood_wait_without_parameters() {
        let body = response(r#"{"ok": false, "description": "Too Many Requests"}"#);
        assert_eq!(
            classify(429, &body),
            SendOutcome::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS
            }
        );
    }

    #[test]
    fn test_classify_slowmode() {
        let body = response(r#"{"ok": false, "description": "SLOWMODE_WAIT_42"}"#);
        assert_eq!(
            classify(400, &body),
            SendOutcome::SlowMode {
                retry_after_secs: 42
            }
        );
    }

    #[test]
    fn test_classify_revoked_token_is_fatal() {
        let body = response(r#"{"ok": false, "description": "Unauthorized"}"#);
        assert!(matches!(
            classify(401, &body),
            SendOutcome::Fatal { .. }
        ));
    }

    #[test]
    fn test_classify_kicked_bot_is_fatal() {
        let body =
            response(r#"{"ok": false, "description": "Forbidden: bot was kicked from the group"}"#);
        assert!(matches!(
            classify(403, &body),
            SendOutcome::Fatal { .. }
        ));
    }

    #[test]
    fn test_classify_chat_not_found_is_fatal() {
        let body = response(r#"{"ok": false, "description": "Bad Request: chat not found"}"#);
        assert!(matches!(
            classify(400, &body),
            SendOutcome::Fatal { .. }
        ));
    }

    #[test]
    fn test_classify_unknown_error_is_transient() {
        let body = response(r#"{"ok": false, "description": "Internal Server Error"}"#);
        assert!(matches!(
            classify(500, &body),
            SendOutcome::Transient { .. }
        ));
    }

    #[test]
    fn test_parse_slowmode_wait() {
        assert_eq!(parse_slowmode_wait("SLOWMODE_WAIT_17"), Some(17));
        assert_eq!(
            parse_slowmode_wait("A wait of SLOWMODE_WAIT_300 is required"),
            Some(300)
        );
        assert_eq!(parse_slowmode_wait("Too Many Requests"), None);
    }
}
