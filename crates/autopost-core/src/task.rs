//! Task data model — the one persisted entity the engine owns.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a payload is delivered: a chat plus an optional forum topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Chat identifier — `@username` or a numeric id as a string.
    pub chat: String,
    /// Forum topic id; `None` or `0` means the main chat.
    #[serde(default)]
    pub topic_id: Option<i64>,
}

impl Destination {
    pub fn chat(chat: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            topic_id: None,
        }
    }

    /// The effective topic, treating 0 as "no topic".
    pub fn topic(&self) -> Option<i64> {
        self.topic_id.filter(|t| *t != 0)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.topic() {
            Some(topic) => write!(f, "{}#{}", self.chat, topic),
            None => write!(f, "{}", self.chat),
        }
    }
}

/// What gets delivered on every cycle: text plus an optional photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub text: String,
    /// Path to a local photo file sent as an attachment with the text
    /// as its caption.
    #[serde(default)]
    pub attachment: Option<PathBuf>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }
}

/// A recurring delivery task.
///
/// Mutated only by the engine (timestamps, counters) and by the operator
/// controls (active flag, interval). The store copy is authoritative; queue
/// snapshots are refreshed from the store at dequeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, assigned at creation, never reused.
    pub id: String,
    pub destination: Destination,
    pub payload: Payload,
    /// Seconds between deliveries (pre-jitter).
    pub interval_secs: u64,
    /// Symmetric random offset applied to the interval on each reschedule.
    #[serde(default)]
    pub jitter_secs: u64,
    /// When false the task must not be re-enqueued.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Last execution attempt (success or failure).
    pub last_run: Option<DateTime<Utc>>,
    /// Updated on every dequeue and every retry wait; the health monitor
    /// treats a very old value as a sign the task's loop died.
    pub last_activity: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub sent_count: u64,
    pub failed_count: u64,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(definition: TaskDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            destination: definition.destination,
            payload: definition.payload,
            interval_secs: definition.interval_secs,
            jitter_secs: definition.jitter_secs,
            active: definition.active,
            created_at: now,
            last_run: None,
            last_activity: now,
            consecutive_failures: 0,
            sent_count: 0,
            failed_count: 0,
            last_error: None,
        }
    }
}

/// What the operator supplies when creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub destination: Destination,
    pub payload: Payload,
    pub interval_secs: u64,
    #[serde(default)]
    pub jitter_secs: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TaskDefinition {
    pub fn new(destination: Destination, payload: Payload, interval_secs: u64) -> Self {
        Self {
            destination,
            payload,
            interval_secs,
            jitter_secs: 0,
            active: true,
        }
    }
}

/// Classified result of one delivery attempt.
///
/// This is the tagged outcome passed between the worker, the retry policy,
/// and the rescheduler — the engine never inspects transport details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    Success,
    /// The API demands a cool-down before any further call.
    RateLimited { retry_after_secs: u64 },
    /// Destination-specific pacing requirement (slow mode).
    SlowMode { retry_after_secs: u64 },
    /// Unclassified failure — worth retrying.
    Transient { reason: String },
    /// Not recoverable without operator action (revoked credentials,
    /// bot kicked from the chat).
    Fatal { reason: String },
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }

    /// Error text for persistence and notifications, if any.
    pub fn error_text(&self) -> Option<String> {
        match self {
            SendOutcome::Success => None,
            SendOutcome::RateLimited { retry_after_secs } => {
                Some(format!("rate limited, retry after {retry_after_secs}s"))
            }
            SendOutcome::SlowMode { retry_after_secs } => {
                Some(format!("slow mode, retry after {retry_after_secs}s"))
            }
            SendOutcome::Transient { reason } | SendOutcome::Fatal { reason } => {
                Some(reason.clone())
            }
        }
    }
}
