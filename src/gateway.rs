//! Gateway (C2): the client facade that reconfigures the PostgREST/Storage
//! views and pushes the realtime socket's auth token whenever the session
//! changes (§4.3)
//!
//! Reconfiguration is atomic and lock-free on the hot path: readers load
//! the current `Postgrest`/`Storage` snapshot through an `ArcSwap`, while
//! the auth listener installs a new one on SIGNED_IN/TOKEN_REFRESHED/
//! SIGNED_OUT. One `reqwest::Client` (and its connection pool) is built
//! once and reused across every reconfiguration via `Transport::with_client`.

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use reqwest::Client;
use serde_json::Value as JsonValue;

use crate::auth::Auth;
use crate::config::Config;
use crate::error::Result;
use crate::postgrest::{Postgrest, QueryBuilder};
use crate::realtime::{Channel, RealtimeManager};
use crate::session::AuthChangeEvent;
use crate::storage::Storage;
use crate::transport::Transport;

struct Inner {
    config: ArcSwap<Config>,
    client: Client,
    auth: Auth,
    postgrest: ArcSwap<Postgrest>,
    storage: ArcSwap<Storage>,
    realtime: RealtimeManager,
}

/// The SDK's top-level client. Cheap to clone — every clone shares the same
/// auth session, connection pool and realtime socket.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Build a Gateway from an anonymous config snapshot and open the
    /// realtime socket. The auth-state listener that keeps `Postgrest`/
    /// `Storage`/realtime in sync is installed before returning.
    pub fn new(config: Config) -> Result<Self> {
        let transport = Transport::new(config.clone())?;
        let client = transport.client().clone();
        let auth = Auth::new(transport.clone());
        let postgrest = Postgrest::new(transport.clone());
        let storage = Storage::new(transport);
        let realtime = RealtimeManager::connect(&config)?;

        let inner = Arc::new(Inner {
            config: ArcSwap::new(Arc::new(config)),
            client,
            auth,
            postgrest: ArcSwap::new(Arc::new(postgrest)),
            storage: ArcSwap::new(Arc::new(storage)),
            realtime,
        });

        // Weak, not strong: a strong Arc here would have the listener
        // (owned by `auth`, owned by `inner`) hold `inner` alive forever.
        // The returned `Subscription` is intentionally dropped without
        // calling `unsubscribe()` — dropping it does not unsubscribe, so
        // this listener stays registered for the Gateway's lifetime.
        let weak = Arc::downgrade(&inner);
        inner.auth.on_auth_state_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                on_auth_change(&inner, event);
            }
        });

        Ok(Self { inner })
    }

    pub fn auth(&self) -> &Auth {
        &self.inner.auth
    }

    pub fn from(&self, table: &str) -> QueryBuilder {
        self.inner.postgrest.load().table(table)
    }

    pub fn rpc(&self, function: &str, args: JsonValue) -> QueryBuilder {
        self.inner.postgrest.load().rpc(function, args)
    }

    pub fn storage(&self) -> Arc<Storage> {
        self.inner.storage.load_full()
    }

    pub async fn channel(&self, topic: impl Into<String>) -> Channel {
        self.inner.realtime.channel(topic).await
    }

    pub fn realtime(&self) -> &RealtimeManager {
        &self.inner.realtime
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config.load_full()
    }
}

/// Reconfigure the credentialed view and push the access token to the
/// realtime socket. Runs synchronously inside `Auth::dispatch` — the
/// `ArcSwap::store` calls are immediate, the realtime push is detached onto
/// its own task since `on_auth_state_change` listeners aren't async.
fn on_auth_change(inner: &Arc<Inner>, event: &AuthChangeEvent) {
    match event {
        AuthChangeEvent::SignedIn(session)
        | AuthChangeEvent::TokenRefreshed(session)
        | AuthChangeEvent::UserUpdated(session)
        | AuthChangeEvent::PasswordRecovery(session) => {
            let access_token = session.access_token.clone();
            if let Err(err) = reconfigure(inner, Some(&access_token)) {
                tracing::warn!(error = %err, "gateway failed to reconfigure on {}", event.name());
                return;
            }
            spawn_realtime_auth_push(inner, access_token);
        }
        AuthChangeEvent::SignedOut => {
            let config = inner.config.load();
            let anon_key = config.api_key().to_string();
            if let Err(err) = reconfigure(inner, None) {
                tracing::warn!(error = %err, "gateway failed to reconfigure on SIGNED_OUT");
                return;
            }
            spawn_realtime_auth_push(inner, anon_key);
        }
        AuthChangeEvent::InitialSession(_) => {}
    }
}

fn reconfigure(inner: &Arc<Inner>, access_token: Option<&str>) -> Result<()> {
    let current = inner.config.load();
    let next_config = match access_token {
        Some(token) => current.with_access_token(token)?,
        None => current.with_access_token(current.api_key())?,
    };

    let transport = Transport::with_client(inner.client.clone(), next_config.clone());
    inner.postgrest.store(Arc::new(Postgrest::new(transport.clone())));
    inner.storage.store(Arc::new(Storage::new(transport)));
    inner.config.store(Arc::new(next_config));
    Ok(())
}

fn spawn_realtime_auth_push(inner: &Arc<Inner>, token: String) {
    let realtime = inner.realtime.clone();
    tokio::spawn(async move {
        realtime.set_auth(token).await;
    });
}
