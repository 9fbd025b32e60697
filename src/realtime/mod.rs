//! Realtime: Phoenix-Channels-style WebSocket subscriptions over Postgres
//! changes, broadcast and presence (§5)

pub mod backoff;
pub mod channel;
pub mod message;
pub mod presence;
mod socket;

pub use channel::{Channel, ChannelState, PostgresChangePayload, PresenceEventKind};
pub use presence::{PresenceDiffResult, PresenceMap};

use crate::config::Config;
use crate::error::Result;
use socket::SocketHandle;

/// Entry point for the realtime service: owns the single shared socket and
/// hands out [`Channel`] handles by topic.
///
/// Cheap to clone — all clones share the same underlying socket and
/// channel registry.
#[derive(Clone)]
pub struct RealtimeManager {
    socket: SocketHandle,
}

impl RealtimeManager {
    /// Open the realtime websocket. Returns immediately; the connection and
    /// any subsequent reconnects happen in a background task (§5).
    pub fn connect(config: &Config) -> Result<Self> {
        let socket = SocketHandle::connect(config)?;
        Ok(Self { socket })
    }

    /// Get or create a [`Channel`] handle for `topic`. Calling this again
    /// with the same topic string returns a handle to the same underlying
    /// state machine rather than a fresh CLOSED one (§4.5 channel registry).
    pub async fn channel(&self, topic: impl Into<String>) -> Channel {
        let topic = topic.into();
        let socket = self.socket.clone();
        self.socket
            .get_or_register_channel(topic.clone(), || Channel::new(topic, socket.clone()))
            .await
    }

    /// Whether the socket currently has an open connection
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Push a fresh access token to the socket and every joined channel —
    /// called by the Gateway on SIGNED_IN/TOKEN_REFRESHED/SIGNED_OUT (§4.3).
    pub async fn set_auth(&self, token: impl Into<String>) {
        self.socket.set_auth(token.into()).await;
    }

    /// Stop the background connection task. Existing `Channel` handles
    /// become inert; `subscribe`/`send` calls on them will fail.
    pub fn close(&self) {
        self.socket.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_lookup_returns_same_topic() {
        let config = Config::builder("https://project.supabase.co", "anon-key").build().unwrap();
        let manager = RealtimeManager::connect(&config).unwrap();
        let channel = manager.channel("realtime:public:todos").await;
        assert_eq!(channel.topic(), "realtime:public:todos");
        manager.close();
    }

    #[tokio::test]
    async fn repeated_lookup_returns_the_same_channel_state_machine() {
        let config = Config::builder("https://project.supabase.co", "anon-key").build().unwrap();
        let manager = RealtimeManager::connect(&config).unwrap();

        let first = manager.channel("realtime:public:todos").await;
        let second = manager.channel("realtime:public:todos").await;
        assert!(first.is_same_channel(&second));

        let other_topic = manager.channel("realtime:public:users").await;
        assert!(!first.is_same_channel(&other_topic));

        manager.close();
    }
}
