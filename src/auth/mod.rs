//! Auth Module (C3)
//!
//! REST operations against the GoTrue-compatible auth service. Maintains
//! the current [`Session`] and dispatches [`AuthChangeEvent`]s to observers
//! synchronously, in registration order, exactly once per establishing or
//! rotating call.

pub mod dto;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Method;
use serde_json::json;

use crate::error::{Error, Result};
use crate::session::{AuthChangeEvent, Session};
use crate::transport::Transport;
use dto::{
    RecoverPasswordRequest, RefreshTokenRequest, SignInWithOtpRequest, SignInWithPasswordRequest,
    SignUpRequest, TokenResponse, UpdateUserRequest, VerifyOtpRequest,
};

type Listener = dyn Fn(&AuthChangeEvent) + Send + Sync + 'static;

struct ListenerEntry {
    id: u64,
    callback: Box<Listener>,
}

struct Inner {
    transport: Transport,
    session: Mutex<Option<Session>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
}

/// REST client for the auth service, plus the locally-held current session
/// and observer registry.
///
/// Cheap to clone — internal state lives behind an `Arc`, so every clone
/// observes and mutates the same session/listener registry. This is what
/// lets the Gateway hold its own `Auth` handle independent of the one the
/// embedder holds.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<Inner>,
}

/// Handle returned by [`Auth::on_auth_state_change`]. Dropping it does not
/// unsubscribe — call [`Subscription::unsubscribe`] explicitly.
pub struct Subscription {
    id: u64,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut listeners = self.inner.listeners.lock().unwrap();
        listeners.retain(|entry| entry.id != self.id);
    }
}

impl Auth {
    pub fn new(transport: Transport) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                session: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener, invoked synchronously and in registration order
    /// on every subsequent auth event. Returns a handle to unsubscribe.
    pub fn on_auth_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthChangeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().push(ListenerEntry {
            id,
            callback: Box::new(listener),
        });
        Subscription {
            id,
            inner: self.inner.clone(),
        }
    }

    /// The currently held session, if any
    pub fn session(&self) -> Option<Session> {
        self.inner.session.lock().unwrap().clone()
    }

    /// Dispatch `event` to every registered listener, in registration
    /// order, each to completion. A panicking listener is isolated with
    /// `catch_unwind` and logged — it never aborts dispatch to the rest.
    fn dispatch(&self, event: AuthChangeEvent) {
        let listeners = self.inner.listeners.lock().unwrap();
        for entry in listeners.iter() {
            let callback = AssertUnwindSafe(|| (entry.callback)(&event));
            if catch_unwind(callback).is_err() {
                tracing::warn!(event = event.name(), listener_id = entry.id, "auth listener panicked");
            }
        }
    }

    fn store_and_dispatch(&self, session: Session, event: fn(Session) -> AuthChangeEvent) {
        *self.inner.session.lock().unwrap() = Some(session.clone());
        self.dispatch(event(session));
    }

    /// Join the configured auth service path prefix with an endpoint
    /// suffix, so every request honors `ConfigBuilder::auth_path` overrides
    /// rather than hardcoding `/auth/v1`.
    fn auth_path(&self, suffix: &str) -> String {
        format!("{}{}", self.inner.transport.config().paths().auth, suffix)
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> Result<Option<Session>> {
        let body = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/signup"))?
            .json(&request);
        let response: TokenResponse = self.inner.transport.send_json(body).await?;
        let session = response.into_session();
        if let Some(session) = &session {
            self.store_and_dispatch(session.clone(), AuthChangeEvent::SignedIn);
        }
        Ok(session)
    }

    pub async fn sign_in_with_password(&self, request: SignInWithPasswordRequest) -> Result<Session> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/token"))?
            .query(&[("grant_type", "password")])
            .json(&request);
        let response: TokenResponse = self.inner.transport.send_json(request_builder).await?;
        let session = response
            .into_session()
            .ok_or_else(|| Error::Protocol("auth service returned no session".to_string()))?;
        self.store_and_dispatch(session.clone(), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Send a one-time-password. No session is established by this call
    /// alone — the caller must follow up with `verify_otp`.
    pub async fn sign_in_with_otp(&self, request: SignInWithOtpRequest) -> Result<()> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/otp"))?
            .json(&request);
        self.inner.transport.send_response(request_builder).await?;
        Ok(())
    }

    pub async fn verify_otp(&self, request: VerifyOtpRequest) -> Result<Session> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/verify"))?
            .json(&request);
        let response: TokenResponse = self.inner.transport.send_json(request_builder).await?;
        let session = response
            .into_session()
            .ok_or_else(|| Error::Protocol("auth service returned no session".to_string()))?;
        self.store_and_dispatch(session.clone(), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Builds the provider redirect URL for an OAuth flow. The caller is
    /// expected to navigate the user there; no HTTP request is made here.
    pub fn sign_in_with_oauth(&self, provider: &str, redirect_to: Option<&str>) -> Result<String> {
        let mut url = self
            .inner
            .transport
            .config()
            .resolve_url(&self.auth_path("/authorize"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect_to) = redirect_to {
                query.append_pair("redirect_to", redirect_to);
            }
        }
        Ok(url.to_string())
    }

    pub async fn sign_in_anonymously(&self) -> Result<Session> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/signup"))?
            .json(&json!({}));
        let response: TokenResponse = self.inner.transport.send_json(request_builder).await?;
        let session = response
            .into_session()
            .ok_or_else(|| Error::Protocol("auth service returned no session".to_string()))?;
        self.store_and_dispatch(session.clone(), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/token"))?
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.to_string(),
            });
        let response: TokenResponse = self.inner.transport.send_json(request_builder).await?;
        let session = response
            .into_session()
            .ok_or_else(|| Error::Protocol("auth service returned no session".to_string()))?;
        self.store_and_dispatch(session.clone(), AuthChangeEvent::TokenRefreshed);
        Ok(session)
    }

    pub async fn update_user(&self, request: UpdateUserRequest) -> Result<Session> {
        let current = self
            .session()
            .ok_or_else(|| Error::Auth { status: 401, message: "no active session".to_string() })?;
        let request_builder = self
            .inner
            .transport
            .new_request(Method::PUT, &self.auth_path("/user"))?
            .bearer_auth(&current.access_token)
            .json(&request);
        let user = self.inner.transport.send_json(request_builder).await?;
        let updated = Session { user, ..current };
        self.store_and_dispatch(updated.clone(), AuthChangeEvent::UserUpdated);
        Ok(updated)
    }

    /// Calls `POST /logout`, clears the local session, and dispatches
    /// SIGNED_OUT only after the server call returns (per §4.2).
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.session() {
            let request_builder = self
                .inner
                .transport
                .new_request(Method::POST, &self.auth_path("/logout"))?
                .bearer_auth(&session.access_token);
            self.inner.transport.send_response(request_builder).await?;
        }
        *self.inner.session.lock().unwrap() = None;
        self.dispatch(AuthChangeEvent::SignedOut);
        Ok(())
    }

    pub async fn recover_password(&self, email: &str) -> Result<()> {
        let request_builder = self
            .inner
            .transport
            .new_request(Method::POST, &self.auth_path("/recover"))?
            .json(&RecoverPasswordRequest { email: email.to_string() });
        self.inner.transport.send_response(request_builder).await?;
        Ok(())
    }

    pub fn get_session(&self) -> Option<Session> {
        self.session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_auth(base_url: &str) -> Auth {
        let config = Config::builder(base_url, "anon-key").build().unwrap();
        Auth::new(Transport::new(config).unwrap())
    }

    fn token_response_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@example.com" }
        })
    }

    #[tokio::test]
    async fn sign_in_with_password_dispatches_signed_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
            .mount(&server)
            .await;

        let auth = test_auth(&server.uri());
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let dispatched_clone = dispatched.clone();
        auth.on_auth_state_change(move |event| {
            dispatched_clone.lock().unwrap().push(event.name().to_string());
        });

        let session = auth
            .sign_in_with_password(SignInWithPasswordRequest {
                email: Some("a@example.com".to_string()),
                password: "secret".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.access_token, "access-1");
        assert_eq!(dispatched.lock().unwrap().as_slice(), ["SIGNED_IN"]);
        assert_eq!(auth.session().unwrap().access_token, "access-1");
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_dispatches_after_server_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let auth = test_auth(&server.uri());
        auth.sign_in_with_password(SignInWithPasswordRequest {
            email: Some("a@example.com".to_string()),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        auth.sign_out().await.unwrap();
        assert!(auth.session().is_none());
    }

    #[tokio::test]
    async fn listeners_are_invoked_in_registration_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
            .mount(&server)
            .await;

        let auth = test_auth(&server.uri());
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            auth.on_auth_state_change(move |_event| order.lock().unwrap().push(tag));
        }

        auth.sign_in_with_password(SignInWithPasswordRequest {
            email: Some("a@example.com".to_string()),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_abort_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
            .mount(&server)
            .await;

        let auth = test_auth(&server.uri());
        let reached = Arc::new(AtomicUsize::new(0));
        auth.on_auth_state_change(|_event| panic!("boom"));
        let reached_clone = reached.clone();
        auth.on_auth_state_change(move |_event| {
            reached_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });

        auth.sign_in_with_password(SignInWithPasswordRequest {
            email: Some("a@example.com".to_string()),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(reached.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
            .mount(&server)
            .await;

        let auth = test_auth(&server.uri());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let subscription = auth.on_auth_state_change(move |_event| {
            calls_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });
        subscription.unsubscribe();

        auth.sign_in_with_password(SignInWithPasswordRequest {
            email: Some("a@example.com".to_string()),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn sign_in_with_oauth_builds_redirect_url() {
        let auth = test_auth("https://project.supabase.co");
        let url = auth
            .sign_in_with_oauth("github", Some("https://app.example.com/callback"))
            .unwrap();
        assert!(url.starts_with("https://project.supabase.co/auth/v1/authorize?"));
        assert!(url.contains("provider=github"));
        assert!(url.contains("redirect_to=https%3A%2F%2Fapp.example.com%2Fcallback"));
    }

    #[test]
    fn custom_auth_path_prefix_is_honored() {
        let config = Config::builder("https://project.supabase.co", "anon-key")
            .auth_path("/custom/auth/v2")
            .build()
            .unwrap();
        let auth = Auth::new(Transport::new(config).unwrap());
        let url = auth.sign_in_with_oauth("github", None).unwrap();
        assert!(url.starts_with("https://project.supabase.co/custom/auth/v2/authorize?"));
    }
}
