//! Wire DTOs for the GoTrue-compatible auth REST service
//!
//! These mirror what the service actually accepts/returns; they are kept
//! separate from [`crate::session::Session`]/[`crate::session::User`] so the
//! public session model stays stable even if the wire shape grows fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{Session, User};

#[derive(Debug, Clone, Serialize, Default)]
pub struct SignUpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "data")]
    pub user_metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SignInWithPasswordRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SignInWithOtpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "data")]
    pub user_metadata: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_user: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOtpRequest {
    #[serde(rename = "type")]
    pub otp_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "data")]
    pub user_metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverPasswordRequest {
    pub email: String,
}

/// GoTrue's token response (`POST /signup`, `/token`). `user`-only variants
/// (e.g. sign-up pending email confirmation) omit the token fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: User,
}

impl TokenResponse {
    /// `None` when the response carries only a pending `user` (e.g. signup
    /// awaiting email confirmation) with no session established yet.
    pub fn into_session(self) -> Option<Session> {
        let access_token = self.access_token?;
        let refresh_token = self.refresh_token?;
        let expires_at = chrono::Utc::now().timestamp() + self.expires_in.unwrap_or(3600);
        Some(Session {
            access_token,
            refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        })
    }
}
