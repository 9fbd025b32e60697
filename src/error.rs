//! Error taxonomy and HTTP/protocol error translation

use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Structured PostgREST error body (`{message, details, hint, code}`)
///
/// PostgREST returns this shape for most 4xx/5xx responses. Parsed eagerly
/// so callers can match on `code` without re-deserializing the raw body.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct PostgrestErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl fmt::Display for PostgrestErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message.as_deref().unwrap_or("postgrest error"))?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

/// Main error type for the SDK
///
/// Large error variants are boxed to keep the enum itself small.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid base URL, missing API key, or other construction-time failure
    #[error("configuration error: {0}")]
    Config(String),

    /// Response status >= 400. Carries status and, when decodable, the
    /// structured PostgREST error body; otherwise the raw response text.
    #[error("http error {status}: {}", body.as_ref().map(|b| b.to_string()).unwrap_or_else(|| text.clone()))]
    Http {
        status: u16,
        text: String,
        body: Option<PostgrestErrorBody>,
    },

    /// JSON or envelope parse failure
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Connection, DNS, TLS, or timeout failure — HTTP (`reqwest::Error`)
    /// or realtime WebSocket (connect/read/write failure, dropped socket).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Specialized HTTP error for 401/403 responses
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Realtime reply-status "error", unexpected envelope, or state-machine violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Future cancellation or manager shutdown
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error represents a transient condition worth retrying
    /// at the embedder's discretion (the core itself never retries HTTP
    /// calls, per §7 policy).
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Http { status, .. } => *status == 429 || *status >= 500,
            Error::Cancelled(_) => false,
            _ => false,
        }
    }

    /// HTTP status code if this error originated from a response, `-1`
    /// for transport failures, `None` for errors with no HTTP context.
    pub fn status(&self) -> Option<i32> {
        match self {
            Error::Http { status, .. } => Some(*status as i32),
            Error::Auth { status, .. } => Some(*status as i32),
            Error::Transport(_) => Some(-1),
            _ => None,
        }
    }

    pub(crate) fn http(status: u16, text: String) -> Self {
        let body = serde_json::from_str::<PostgrestErrorBody>(&text).ok();
        if status == 401 || status == 403 {
            return Error::Auth {
                status,
                message: body
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| text.clone()),
            };
        }
        Error::Http { status, text, body }
    }

    pub(crate) fn decode(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Decode(Box::new(err))
    }

    /// Build a `Transport` error from a plain message, for failures (e.g. a
    /// dropped realtime socket) that have no underlying `reqwest::Error` to
    /// wrap.
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(Box::new(err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid url: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_401_becomes_auth_error() {
        let err = Error::http(401, r#"{"message":"invalid token"}"#.to_string());
        assert!(matches!(err, Error::Auth { status: 401, .. }));
    }

    #[test]
    fn http_500_is_retriable() {
        let err = Error::http(500, "internal error".to_string());
        assert!(err.is_retriable());
    }

    #[test]
    fn http_400_is_not_retriable() {
        let err = Error::http(400, "bad request".to_string());
        assert!(!err.is_retriable());
    }

    #[test]
    fn postgrest_body_parses_when_present() {
        let err = Error::http(409, r#"{"message":"duplicate key","code":"23505"}"#.to_string());
        match err {
            Error::Http { body: Some(b), .. } => assert_eq!(b.code.as_deref(), Some("23505")),
            other => panic!("expected structured body, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_body_falls_back_to_raw_text() {
        let err = Error::http(500, "<html>gateway error</html>".to_string());
        match err {
            Error::Http { body: None, text, .. } => assert_eq!(text, "<html>gateway error</html>"),
            other => panic!("expected raw-text fallback, got {other:?}"),
        }
    }
}
