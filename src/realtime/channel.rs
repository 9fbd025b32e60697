//! Per-channel join/leave state machine, listener registry and dispatch
//!
//! All state transitions, outbound writes and listener dispatch for one
//! channel are serialized through `ChannelInner::state` — two events on the
//! same channel never invoke callbacks concurrently, but different channels
//! dispatch independently (§5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::realtime::message::{
    PhoenixMessage, ACCESS_TOKEN, PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_LEAVE, POSTGRES_CHANGES,
};
use crate::realtime::presence::{self, PresenceMap};
use crate::realtime::socket::SocketHandle;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Joining,
    Joined,
    Leaving,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceEventKind {
    Sync,
    Join,
    Leave,
}

#[derive(Debug, Clone)]
pub struct PostgresChangePayload {
    pub event_type: String,
    pub columns: JsonValue,
    pub old_record: Option<JsonValue>,
    pub new_record: Option<JsonValue>,
    pub commit_timestamp: Option<String>,
    pub errors: Option<JsonValue>,
}

type PostgresChangeCallback = Arc<dyn Fn(PostgresChangePayload) + Send + Sync>;
type BroadcastCallback = Arc<dyn Fn(JsonValue) + Send + Sync>;
type PresenceCallback = Arc<dyn Fn(&PresenceMap, &presence::PresenceDiffResult) + Send + Sync>;

struct PostgresChangeListener {
    event: String,
    schema: String,
    table: Option<String>,
    filter: Option<String>,
    server_id: Option<i64>,
    callback: PostgresChangeCallback,
}

#[derive(Default)]
struct Listeners {
    postgres_changes: Vec<PostgresChangeListener>,
    broadcast: HashMap<String, Vec<BroadcastCallback>>,
    presence: HashMap<PresenceEventKind, Vec<PresenceCallback>>,
    broadcast_self: bool,
    presence_key: Option<String>,
}

type StatusCallback = Arc<dyn Fn(ChannelState) + Send + Sync>;

struct Mutable {
    state: ChannelState,
    join_ref: Option<String>,
    listeners: Listeners,
    presence: PresenceMap,
    /// Set when a socket drop demotes a JOINED channel back to JOINING;
    /// cleared once the reattached socket has re-sent `phx_join`.
    needs_rejoin: bool,
    /// The status callback passed to the original `subscribe()`, reused by
    /// `rejoin()` so auto-rejoin after a reconnect still reports state.
    last_status: Option<StatusCallback>,
}

struct ChannelInner {
    topic: String,
    socket: SocketHandle,
    mutable: Mutex<Mutable>,
}

/// Handle to one realtime topic. Cheap to clone — all clones share the
/// same underlying state machine.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(topic: String, socket: SocketHandle) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                topic,
                socket,
                mutable: Mutex::new(Mutable {
                    state: ChannelState::Closed,
                    join_ref: None,
                    listeners: Listeners::default(),
                    presence: PresenceMap::new(),
                    needs_rejoin: false,
                    last_status: None,
                }),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Whether `self` and `other` share the same underlying state machine
    /// (i.e. both handles came from the same `channel(topic)` registry
    /// entry). Used by the manager's lookup-identity test.
    #[cfg(test)]
    pub(crate) fn is_same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn state(&self) -> ChannelState {
        self.inner.mutable.lock().await.state
    }

    /// Register a postgres-changes filter. Must be called before
    /// `subscribe` — the join payload carries every registered filter.
    pub async fn on_postgres_changes<F>(
        &self,
        event: &str,
        schema: &str,
        table: Option<&str>,
        filter: Option<&str>,
        callback: F,
    ) where
        F: Fn(PostgresChangePayload) + Send + Sync + 'static,
    {
        let mut mutable = self.inner.mutable.lock().await;
        mutable.listeners.postgres_changes.push(PostgresChangeListener {
            event: event.to_string(),
            schema: schema.to_string(),
            table: table.map(|t| t.to_string()),
            filter: filter.map(|f| f.to_string()),
            server_id: None,
            callback: Arc::new(callback),
        });
    }

    pub async fn on_broadcast<F>(&self, event: &str, callback: F)
    where
        F: Fn(JsonValue) + Send + Sync + 'static,
    {
        let mut mutable = self.inner.mutable.lock().await;
        mutable
            .listeners
            .broadcast
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    pub async fn on_presence<F>(&self, kind: PresenceEventKind, callback: F)
    where
        F: Fn(&PresenceMap, &presence::PresenceDiffResult) + Send + Sync + 'static,
    {
        let mut mutable = self.inner.mutable.lock().await;
        mutable.listeners.presence.entry(kind).or_default().push(Arc::new(callback));
    }

    pub async fn set_broadcast_self(&self, enabled: bool) {
        self.inner.mutable.lock().await.listeners.broadcast_self = enabled;
    }

    pub async fn set_presence_key(&self, key: &str) {
        self.inner.mutable.lock().await.listeners.presence_key = Some(key.to_string());
    }

    /// Current locally-held presence snapshot (§11 supplement)
    pub async fn presence_state(&self) -> PresenceMap {
        self.inner.mutable.lock().await.presence.clone()
    }

    /// Join the channel. A no-op re-invoking `status` with the current
    /// state if already JOINING/JOINED.
    pub async fn subscribe<F>(&self, status: F) -> Result<()>
    where
        F: Fn(ChannelState) + Send + Sync + 'static,
    {
        let status: StatusCallback = Arc::new(status);
        {
            let mut mutable = self.inner.mutable.lock().await;
            if matches!(mutable.state, ChannelState::Joining | ChannelState::Joined) {
                status(mutable.state);
                return Ok(());
            }
            mutable.last_status = Some(status.clone());
        }
        self.do_join(status).await
    }

    /// Re-sends `phx_join` for a channel the socket demoted on reconnect.
    /// Called by the socket's reader loop after it re-establishes the
    /// connection; a no-op unless `mark_for_rejoin` flagged this channel.
    pub(crate) async fn rejoin(&self) {
        let status = {
            let mut mutable = self.inner.mutable.lock().await;
            if !mutable.needs_rejoin {
                return;
            }
            mutable.needs_rejoin = false;
            mutable.last_status.clone().unwrap_or_else(|| Arc::new(|_| {}))
        };
        if let Err(err) = self.do_join(status).await {
            tracing::warn!(topic = %self.inner.topic, error = %err, "channel rejoin failed");
        }
    }

    async fn do_join(&self, status: StatusCallback) -> Result<()> {
        let join_payload = {
            let mut mutable = self.inner.mutable.lock().await;
            mutable.state = ChannelState::Joining;
            let join_ref = self.inner.socket.next_ref();
            mutable.join_ref = Some(join_ref.clone());
            (join_ref, build_join_payload(&mutable.listeners, self.inner.socket.current_token().await))
        };
        let (join_ref, payload) = join_payload;

        let message = PhoenixMessage::new(self.inner.topic.clone(), PHX_JOIN, payload)
            .with_join_ref(join_ref.clone());

        let result = timeout(JOIN_TIMEOUT, self.inner.socket.send_and_await(message, join_ref)).await;

        let mut mutable = self.inner.mutable.lock().await;
        match result {
            Ok(Ok(reply_payload)) => {
                mutable.state = ChannelState::Joined;
                apply_server_assigned_ids(&mut mutable.listeners, &reply_payload);
                status(ChannelState::Joined);
                Ok(())
            }
            Ok(Err(err)) => {
                mutable.state = ChannelState::Errored;
                status(ChannelState::Errored);
                Err(err)
            }
            Err(_elapsed) => {
                mutable.state = ChannelState::Errored;
                status(ChannelState::Errored);
                Err(Error::Protocol(format!("channel join timed out after {JOIN_TIMEOUT:?}")))
            }
        }
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        let leave_ref = {
            let mut mutable = self.inner.mutable.lock().await;
            mutable.state = ChannelState::Leaving;
            self.inner.socket.next_ref()
        };
        let message = PhoenixMessage::new(self.inner.topic.clone(), PHX_LEAVE, json!({}));
        let result = self.inner.socket.send_and_await(message, leave_ref).await;

        let mut mutable = self.inner.mutable.lock().await;
        mutable.state = ChannelState::Closed;
        self.inner.socket.remove_channel(&self.inner.topic).await;
        result.map(|_| ())
    }

    /// Forces a rejoin attempt after the socket reattaches post-reconnect
    pub(crate) async fn mark_for_rejoin(&self) {
        let mut mutable = self.inner.mutable.lock().await;
        if mutable.state == ChannelState::Joined {
            mutable.state = ChannelState::Joining;
            mutable.needs_rejoin = true;
        }
    }

    /// Entry point for the socket's reader loop: serializes state updates
    /// and listener invocation for this channel.
    pub(crate) async fn dispatch_inbound(&self, message: PhoenixMessage) {
        let mut mutable = self.inner.mutable.lock().await;
        match message.event.as_str() {
            POSTGRES_CHANGES => dispatch_postgres_change(&mutable.listeners, &message.payload),
            crate::realtime::message::BROADCAST => dispatch_broadcast(&mutable.listeners, &message.payload),
            crate::realtime::message::PRESENCE_STATE => {
                presence::apply_state(&mut mutable.presence, &message.payload);
                let empty_diff = presence::PresenceDiffResult::default();
                if let Some(callbacks) = mutable.listeners.presence.get(&PresenceEventKind::Sync) {
                    for callback in callbacks {
                        callback(&mutable.presence, &empty_diff);
                    }
                }
            }
            crate::realtime::message::PRESENCE_DIFF => {
                let diff_result = presence::apply_diff(&mut mutable.presence, &message.payload);
                if !diff_result.joined.is_empty() {
                    if let Some(callbacks) = mutable.listeners.presence.get(&PresenceEventKind::Join) {
                        for callback in callbacks {
                            callback(&mutable.presence, &diff_result);
                        }
                    }
                }
                if !diff_result.left.is_empty() {
                    if let Some(callbacks) = mutable.listeners.presence.get(&PresenceEventKind::Leave) {
                        for callback in callbacks {
                            callback(&mutable.presence, &diff_result);
                        }
                    }
                }
            }
            PHX_CLOSE => mutable.state = ChannelState::Closed,
            PHX_ERROR => mutable.state = ChannelState::Errored,
            _ => {
                tracing::debug!(event = %message.event, topic = %self.inner.topic, "unhandled realtime event");
            }
        }
    }

    /// The access-token update sent on `setAuth`, bypassing listener
    /// dispatch (it's an outbound housekeeping message, not an inbound one)
    pub(crate) async fn send_access_token(&self, token: &str) {
        let is_joined = matches!(self.inner.mutable.lock().await.state, ChannelState::Joined);
        if !is_joined {
            return;
        }
        let message = PhoenixMessage::new(
            self.inner.topic.clone(),
            ACCESS_TOKEN,
            json!({ "access_token": token }),
        );
        self.inner.socket.send_fire_and_forget(message);
    }
}

fn build_join_payload(listeners: &Listeners, token: String) -> JsonValue {
    let postgres_changes: Vec<JsonValue> = listeners
        .postgres_changes
        .iter()
        .map(|listener| {
            let mut entry = json!({
                "event": listener.event,
                "schema": listener.schema,
            });
            if let Some(table) = &listener.table {
                entry["table"] = json!(table);
            }
            if let Some(filter) = &listener.filter {
                entry["filter"] = json!(filter);
            }
            entry
        })
        .collect();

    json!({
        "config": {
            "broadcast": { "self": listeners.broadcast_self },
            "presence": { "key": listeners.presence_key.clone().unwrap_or_default() },
            "postgres_changes": postgres_changes,
        },
        "access_token": token,
    })
}

/// The server echoes assigned ids for `postgres_changes` filters in the
/// join-ok reply, correlated to client listeners by declaration order
/// (§9 design note).
fn apply_server_assigned_ids(listeners: &mut Listeners, reply_payload: &JsonValue) {
    let assigned = reply_payload
        .get("response")
        .and_then(|r| r.get("postgres_changes"))
        .and_then(|p| p.as_array());
    if let Some(assigned) = assigned {
        for (listener, echoed) in listeners.postgres_changes.iter_mut().zip(assigned.iter()) {
            listener.server_id = echoed.get("id").and_then(|id| id.as_i64());
        }
    }
}

fn dispatch_postgres_change(listeners: &Listeners, payload: &JsonValue) {
    let data = payload.get("data").unwrap_or(payload);
    let event_type = data
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let schema = data.get("schema").and_then(|s| s.as_str());
    let table = data.get("table").and_then(|t| t.as_str());
    let ids = payload.get("ids").and_then(|ids| ids.as_array());

    for listener in &listeners.postgres_changes {
        let matches_by_id = match (ids, listener.server_id) {
            (Some(ids), Some(server_id)) => ids.iter().any(|id| id.as_i64() == Some(server_id)),
            _ => false,
        };
        // A field the inbound message doesn't carry constrains nothing —
        // only narrow the match on schema/table when the payload actually
        // states them (the join-ok scenario's minimal payloads omit both).
        let schema_matches = schema.map(|s| listener.schema == s).unwrap_or(true);
        let table_matches = table
            .map(|t| listener.table.as_deref().map(|lt| lt == t).unwrap_or(true))
            .unwrap_or(true);
        let matches_by_shape =
            (listener.event == "*" || listener.event == event_type) && schema_matches && table_matches;

        if matches_by_id || matches_by_shape {
            let change = PostgresChangePayload {
                event_type: event_type.clone(),
                columns: data.get("columns").cloned().unwrap_or(JsonValue::Null),
                old_record: data.get("old_record").cloned(),
                new_record: data.get("record").cloned(),
                commit_timestamp: data
                    .get("commit_timestamp")
                    .and_then(|t| t.as_str())
                    .map(|t| t.to_string()),
                errors: payload.get("errors").cloned(),
            };
            (listener.callback)(change);
        }
    }
}

fn dispatch_broadcast(listeners: &Listeners, payload: &JsonValue) {
    let event = payload.get("event").and_then(|e| e.as_str()).unwrap_or_default();
    if let Some(callbacks) = listeners.broadcast.get(event) {
        let inner_payload = payload.get("payload").cloned().unwrap_or(JsonValue::Null);
        for callback in callbacks {
            callback(inner_payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn listener(event: &str, schema: &str, table: Option<&str>, hits: Arc<AtomicUsize>) -> PostgresChangeListener {
        PostgresChangeListener {
            event: event.to_string(),
            schema: schema.to_string(),
            table: table.map(|t| t.to_string()),
            filter: None,
            server_id: None,
            callback: Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn minimal_payload_without_schema_or_table_still_matches_a_table_scoped_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let listeners = Listeners {
            postgres_changes: vec![listener("INSERT", "public", Some("todos"), hits.clone())],
            ..Listeners::default()
        };

        // The join+insert-dispatch scenario's inbound frame carries neither
        // `schema` nor `table` in `data` — only `type` and `record`.
        let payload = json!({ "data": { "type": "INSERT", "record": { "id": 1 } } });
        dispatch_postgres_change(&listeners, &payload);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_table_in_payload_still_excludes_a_mismatched_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let listeners = Listeners {
            postgres_changes: vec![listener("INSERT", "public", Some("todos"), hits.clone())],
            ..Listeners::default()
        };

        let payload = json!({
            "data": { "type": "INSERT", "schema": "public", "table": "users", "record": { "id": 1 } }
        });
        dispatch_postgres_change(&listeners, &payload);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_event_matches_any_event_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let listeners = Listeners {
            postgres_changes: vec![listener("*", "public", Some("todos"), hits.clone())],
            ..Listeners::default()
        };

        let payload = json!({ "data": { "type": "DELETE", "table": "todos" } });
        dispatch_postgres_change(&listeners, &payload);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
