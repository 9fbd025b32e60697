//! Phoenix Channels wire envelope

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_CLOSE: &str = "phx_close";
pub const PHX_ERROR: &str = "phx_error";
pub const HEARTBEAT: &str = "heartbeat";
pub const ACCESS_TOKEN: &str = "access_token";
pub const BROADCAST: &str = "broadcast";
pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const SYSTEM: &str = "system";
pub const PHOENIX_TOPIC: &str = "phoenix";

/// `{join_ref, ref, topic, event, payload}`. `ref`/`join_ref` are carried
/// as strings on the wire (Phoenix convention), allocated from a
/// process-wide monotonic counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub join_ref: Option<String>,
    #[serde(rename = "ref")]
    pub message_ref: Option<String>,
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
}

impl PhoenixMessage {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            join_ref: None,
            message_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn with_ref(mut self, message_ref: String) -> Self {
        self.message_ref = Some(message_ref);
        self
    }

    pub fn with_join_ref(mut self, join_ref: String) -> Self {
        self.join_ref = Some(join_ref);
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_reply(&self) -> bool {
        self.event == PHX_REPLY
    }

    /// Whether a `phx_reply` payload carries `status: "ok"`
    pub fn reply_is_ok(&self) -> bool {
        self.payload.get("status").and_then(|s| s.as_str()) == Some("ok")
    }
}

/// Allocates `ref`/`join_ref` values from a process-wide monotonic counter
#[derive(Debug, Default)]
pub struct RefCounter {
    next: std::sync::atomic::AtomicU64,
}

impl RefCounter {
    pub fn new() -> Self {
        Self { next: std::sync::atomic::AtomicU64::new(1) }
    }

    pub fn next(&self) -> String {
        self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_counter_is_monotonic() {
        let counter = RefCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert_ne!(a, b);
        assert!(a.parse::<u64>().unwrap() < b.parse::<u64>().unwrap());
    }

    #[test]
    fn round_trips_through_json() {
        let message = PhoenixMessage::new("realtime:public:todos", PHX_JOIN, serde_json::json!({}))
            .with_ref("1".to_string());
        let json = message.to_json().unwrap();
        let parsed = PhoenixMessage::from_json(&json).unwrap();
        assert_eq!(parsed.topic, "realtime:public:todos");
        assert_eq!(parsed.message_ref.as_deref(), Some("1"));
    }

    #[test]
    fn reply_status_ok_is_detected() {
        let message = PhoenixMessage::new("t", PHX_REPLY, serde_json::json!({"status": "ok"}));
        assert!(message.is_reply());
        assert!(message.reply_is_ok());
    }
}
