//! Process-wide realtime WebSocket transport
//!
//! One socket multiplexes every channel: a single task owns the connection
//! for its lifetime, serializing all outbound writes through an internal
//! queue and dispatching every inbound frame to the right channel or
//! pending-reply waiter (§5). Reconnects are transparent to callers —
//! `send_and_await` simply queues and waits; it doesn't know whether the
//! socket is currently up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::realtime::channel::Channel;
use crate::realtime::message::{PhoenixMessage, RefCounter, HEARTBEAT, PHOENIX_TOPIC};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_REPLY_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_MISSED_HEARTBEATS: u32 = 2;

type PendingReplies = Mutex<HashMap<String, oneshot::Sender<Result<JsonValue>>>>;
type ChannelRegistry = Mutex<HashMap<String, Channel>>;

struct SocketState {
    ws_url: Url,
    ref_counter: RefCounter,
    outbound_tx: mpsc::UnboundedSender<PhoenixMessage>,
    pending: PendingReplies,
    channels: ChannelRegistry,
    token: Mutex<String>,
    shutdown_tx: watch::Sender<bool>,
    connected: AtomicBool,
}

/// Cheap, cloneable handle to the shared realtime socket. Every [`Channel`]
/// and the [`super::RealtimeManager`] hold a clone; the underlying
/// connection task owns the only `WebSocketStream`.
#[derive(Clone)]
pub struct SocketHandle {
    state: Arc<SocketState>,
}

impl SocketHandle {
    /// Build the realtime websocket URL and spawn the connection task.
    /// Returns immediately — the first connection attempt runs in the
    /// background, and early `send_and_await` calls simply queue until it
    /// lands.
    pub(crate) fn connect(config: &Config) -> Result<Self> {
        let ws_url = realtime_ws_url(config)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(SocketState {
            ws_url,
            ref_counter: RefCounter::new(),
            outbound_tx,
            pending: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            token: Mutex::new(config.api_key().to_string()),
            shutdown_tx,
            connected: AtomicBool::new(false),
        });

        let handle = Self { state: state.clone() };
        tokio::spawn(run_connection_loop(state, outbound_rx, shutdown_rx));
        Ok(handle)
    }

    pub(crate) fn next_ref(&self) -> String {
        self.state.ref_counter.next()
    }

    pub(crate) async fn current_token(&self) -> String {
        self.state.token.lock().await.clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    /// Returns the existing channel registered under `topic`, or registers
    /// and returns `make()`'s fresh CLOSED channel if none exists yet.
    pub(crate) async fn get_or_register_channel(
        &self,
        topic: String,
        make: impl FnOnce() -> Channel,
    ) -> Channel {
        let mut channels = self.state.channels.lock().await;
        channels.entry(topic).or_insert_with(make).clone()
    }

    pub(crate) async fn remove_channel(&self, topic: &str) {
        self.state.channels.lock().await.remove(topic);
    }

    /// Update the token used for future joins and push `access_token` to
    /// every currently joined channel (Gateway's `set_auth`, §4.3).
    pub(crate) async fn set_auth(&self, token: String) {
        *self.state.token.lock().await = token.clone();
        let channels: Vec<Channel> = self.state.channels.lock().await.values().cloned().collect();
        for channel in channels {
            channel.send_access_token(&token).await;
        }
    }

    /// Queue a message and wait for its correlated `phx_reply`.
    pub(crate) async fn send_and_await(&self, message: PhoenixMessage, message_ref: String) -> Result<JsonValue> {
        let (tx, rx) = oneshot::channel();
        self.state.pending.lock().await.insert(message_ref.clone(), tx);

        let message = message.with_ref(message_ref.clone());
        if self.state.outbound_tx.send(message).is_err() {
            self.state.pending.lock().await.remove(&message_ref);
            return Err(Error::Cancelled("realtime socket is shut down".to_string()));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::transport("realtime websocket connection dropped")),
        }
    }

    /// Queue a message with no reply expected (`access_token` updates).
    pub(crate) fn send_fire_and_forget(&self, message: PhoenixMessage) {
        let message_ref = self.next_ref();
        let _ = self.state.outbound_tx.send(message.with_ref(message_ref));
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(true);
    }
}

fn realtime_ws_url(config: &Config) -> Result<Url> {
    let scheme = match config.base_url().scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let mut url = config.base_url().clone();
    url.set_scheme(scheme)
        .map_err(|_| Error::Config("base url has no host to convert to a websocket scheme".to_string()))?;
    let path = format!("{}/websocket", config.paths().realtime.trim_end_matches('/'));
    let mut url = url.join(&path)?;
    url.query_pairs_mut()
        .append_pair("apikey", config.api_key())
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

async fn run_connection_loop(
    state: Arc<SocketState>,
    mut outbound_rx: mpsc::UnboundedReceiver<PhoenixMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = crate::realtime::backoff::Backoff::new();
    let mut first_attempt = true;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        if !first_attempt {
            let delay = backoff.next_delay();
            tracing::debug!(delay = ?delay, "realtime reconnect backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
        first_attempt = false;

        let stream = match tokio_tungstenite::connect_async(state.ws_url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "realtime websocket connect failed");
                continue;
            }
        };

        tracing::info!(url = %state.ws_url, "realtime websocket connected");
        state.connected.store(true, Ordering::Relaxed);
        backoff.reset();

        rejoin_all_channels(&state).await;

        let disconnect_reason = drive_connection(&state, stream, &mut outbound_rx, &mut shutdown_rx).await;
        state.connected.store(false, Ordering::Relaxed);
        fail_all_pending(&state, "realtime websocket connection dropped").await;
        mark_all_channels_for_rejoin(&state).await;

        match disconnect_reason {
            DisconnectReason::Shutdown => return,
            DisconnectReason::SocketClosed | DisconnectReason::HeartbeatMissed => continue,
        }
    }
}

enum DisconnectReason {
    Shutdown,
    SocketClosed,
    HeartbeatMissed,
}

async fn drive_connection(
    state: &Arc<SocketState>,
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<PhoenixMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> DisconnectReason {
    let (mut writer, mut reader) = stream.split();
    let mut heartbeat_tick = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut missed_heartbeats: u32 = 0;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = writer.close().await;
                    return DisconnectReason::Shutdown;
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        let Ok(text) = message.to_json() else { continue };
                        if writer.send(WsMessage::Text(text.into())).await.is_err() {
                            return DisconnectReason::SocketClosed;
                        }
                    }
                    None => return DisconnectReason::Shutdown,
                }
            }

            inbound = reader.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(message) = PhoenixMessage::from_json(&text) {
                            handle_inbound(state, message, &mut missed_heartbeats).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return DisconnectReason::SocketClosed,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "realtime websocket read error");
                        return DisconnectReason::SocketClosed;
                    }
                    _ => {}
                }
            }

            _ = heartbeat_tick.tick() => {
                if missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                    tracing::warn!("realtime heartbeat missed twice, forcing reconnect");
                    let _ = writer.close().await;
                    return DisconnectReason::HeartbeatMissed;
                }
                let heartbeat_ref = state.ref_counter.next();
                let heartbeat = PhoenixMessage::new(PHOENIX_TOPIC, HEARTBEAT, json!({}))
                    .with_ref(heartbeat_ref.clone());
                if let Ok(text) = heartbeat.to_json() {
                    if writer.send(WsMessage::Text(text.into())).await.is_err() {
                        return DisconnectReason::SocketClosed;
                    }
                }
                state.pending.lock().await.insert(heartbeat_ref, {
                    let (tx, rx) = oneshot::channel();
                    tokio::spawn(await_heartbeat_reply(rx));
                    tx
                });
                missed_heartbeats += 1;
            }
        }
    }
}

/// Heartbeat replies are fire-and-forget from the loop's perspective — the
/// oneshot is only there so `handle_inbound`'s generic pending-reply path
/// can resolve it; nothing awaits the receiver directly beyond this sink.
async fn await_heartbeat_reply(rx: oneshot::Receiver<Result<JsonValue>>) {
    let _ = tokio::time::timeout(HEARTBEAT_REPLY_TIMEOUT, rx).await;
}

async fn handle_inbound(state: &Arc<SocketState>, message: PhoenixMessage, missed_heartbeats: &mut u32) {
    if message.is_reply() {
        if let Some(message_ref) = &message.message_ref {
            if let Some(sender) = state.pending.lock().await.remove(message_ref) {
                *missed_heartbeats = 0;
                let result = if message.reply_is_ok() {
                    Ok(message.payload.clone())
                } else {
                    Err(Error::Protocol(format!("realtime reply error: {}", message.payload)))
                };
                let _ = sender.send(result);
                return;
            }
        }
    }

    let channel = state.channels.lock().await.get(&message.topic).cloned();
    if let Some(channel) = channel {
        channel.dispatch_inbound(message).await;
    } else {
        tracing::debug!(topic = %message.topic, event = %message.event, "realtime message for unknown topic");
    }
}

async fn fail_all_pending(state: &Arc<SocketState>, message: &str) {
    let mut pending = state.pending.lock().await;
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err(Error::transport(message)));
    }
}

async fn mark_all_channels_for_rejoin(state: &Arc<SocketState>) {
    let channels: Vec<Channel> = state.channels.lock().await.values().cloned().collect();
    for channel in channels {
        channel.mark_for_rejoin().await;
    }
}

async fn rejoin_all_channels(state: &Arc<SocketState>) {
    let channels: Vec<Channel> = state.channels.lock().await.values().cloned().collect();
    for channel in channels {
        channel.rejoin().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_uses_wss_scheme_and_carries_apikey() {
        let config = Config::builder("https://project.supabase.co", "anon-key").build().unwrap();
        let url = realtime_ws_url(&config).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert!(url.query().unwrap().contains("apikey=anon-key"));
        assert!(url.query().unwrap().contains("vsn=1.0.0"));
    }

    #[test]
    fn realtime_url_uses_ws_scheme_for_plain_http() {
        let config = Config::builder("http://localhost:54321", "anon-key").build().unwrap();
        let url = realtime_ws_url(&config).unwrap();
        assert_eq!(url.scheme(), "ws");
    }
}
