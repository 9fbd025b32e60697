//! Session, user and auth-state-change event types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote user's public descriptor: id, email, and a free-form metadata map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "user_metadata")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// An established auth session
///
/// Created on sign-in/sign-up/token-refresh, replaced atomically by Auth,
/// cleared on sign-out. Persisting this across process restarts is the
/// embedder's responsibility — the SDK never reads or writes disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds-from-epoch at which `access_token` expires
    pub expires_at: i64,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now().timestamp()
    }
}

/// Tagged auth lifecycle event, dispatched synchronously to every listener
/// registered via `Auth::on_auth_state_change`
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChangeEvent {
    /// Dispatched only if the embedder explicitly requests an initial
    /// replay; the SDK itself never emits this at construction (see
    /// DESIGN.md's resolution of the INITIAL_SESSION open question).
    InitialSession(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
    PasswordRecovery(Session),
}

impl AuthChangeEvent {
    /// The session carried by this event, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthChangeEvent::InitialSession(session) => session.as_ref(),
            AuthChangeEvent::SignedIn(session) => Some(session),
            AuthChangeEvent::SignedOut => None,
            AuthChangeEvent::TokenRefreshed(session) => Some(session),
            AuthChangeEvent::UserUpdated(session) => Some(session),
            AuthChangeEvent::PasswordRecovery(session) => Some(session),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthChangeEvent::InitialSession(_) => "INITIAL_SESSION",
            AuthChangeEvent::SignedIn(_) => "SIGNED_IN",
            AuthChangeEvent::SignedOut => "SIGNED_OUT",
            AuthChangeEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthChangeEvent::UserUpdated(_) => "USER_UPDATED",
            AuthChangeEvent::PasswordRecovery(_) => "PASSWORD_RECOVERY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(expires_at: i64) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_at,
            user: User {
                id: "u1".to_string(),
                email: Some("a@example.com".to_string()),
                phone: None,
                metadata: HashMap::new(),
                created_at: None,
            },
        }
    }

    #[test]
    fn expired_session_is_detected() {
        let session = sample_session(0);
        assert!(session.is_expired());
    }

    #[test]
    fn future_expiry_is_not_expired() {
        let session = sample_session(Utc::now().timestamp() + 3600);
        assert!(!session.is_expired());
    }

    #[test]
    fn event_name_matches_wire_tag() {
        assert_eq!(AuthChangeEvent::SignedOut.name(), "SIGNED_OUT");
        assert_eq!(
            AuthChangeEvent::SignedIn(sample_session(0)).name(),
            "SIGNED_IN"
        );
    }

    #[test]
    fn signed_out_carries_no_session() {
        assert!(AuthChangeEvent::SignedOut.session().is_none());
    }
}
