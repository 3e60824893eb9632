//! Telegram notification sink — owner updates on task outcomes.
//!
//! Fire-and-forget by contract: every error here is logged and swallowed, so
//! a broken notification chat can never stall a task's schedule.

use std::time::Duration;

use async_trait::async_trait;
use autopost_core::config::{NotifyConfig, TelegramConfig};
use autopost_core::task::{SendOutcome, Task};
use autopost_core::traits::NotifySink;

pub struct TelegramNotify {
    telegram: TelegramConfig,
    config: NotifyConfig,
    client: reqwest::Client,
}

impl TelegramNotify {
    pub fn new(telegram: TelegramConfig, config: NotifyConfig) -> Self {
        Self {
            telegram,
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotifySink for TelegramNotify {
    async fn notify(&self, task: &Task, outcome: &SendOutcome, next_attempt_in: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let Some(chat_id) = self.config.chat_id else {
            return;
        };

        let (text, silent) = format_notification(task, outcome, next_attempt_in);
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.telegram.bot_token
        );
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_notification": silent,
        });

        match self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!("notification rejected: {}", response.status());
            }
            Err(e) => {
                tracing::warn!("notification failed: {e}");
            }
        }
    }
}

/// Build the owner-facing text. Success notifications are silent
/// (no sound), failures and parks ring through.
fn format_notification(
    task: &Task,
    outcome: &SendOutcome,
    next_attempt_in: Option<Duration>,
) -> (String, bool) {
    let next = next_attempt_in
        .map(|d| format!("\n⏱ Next attempt in ~{}s", d.as_secs()))
        .unwrap_or_default();

    match outcome {
        SendOutcome::Success => (
            format!("✅ Delivered to {}{next}", task.destination),
            true,
        ),
        SendOutcome::Fatal { reason } => (
            format!(
                "🚨 Task {} parked: {reason}\nResume it once the problem is fixed.",
                task.id
            ),
            false,
        ),
        other => (
            format!(
                "⚠️ Delivery to {} failed: {}{next}",
                task.destination,
                other.error_text().unwrap_or_default()
            ),
            false,
        ),
    }
}
