//! Error types for the console request pipeline.
//!
//! # Design
//! Every failure a caller can observe is one `ApiError`. The `Display` text is
//! for logs; `user_message` is the fixed human-readable text surfaced through
//! the `Notifier`. Envelope-carrying variants keep the whole envelope so
//! callers can branch on the backend code.

use crate::envelope::Envelope;

pub const MSG_CONFIG: &str = "Request configuration error";
pub const MSG_SESSION_EXPIRED: &str = "Session expired, please log in again";
pub const MSG_BUSINESS: &str = "Request failed";
pub const MSG_UNAUTHORIZED: &str = "Unauthorized, please log in again";
pub const MSG_FORBIDDEN: &str = "Access denied";
pub const MSG_NOT_FOUND: &str = "Requested resource not found";
pub const MSG_SERVER_ERROR: &str = "Internal server error";
pub const MSG_NETWORK: &str = "Network unreachable, please check your connection";
pub const MSG_TIMEOUT: &str = "Request timed out, please try again later";
pub const MSG_MALFORMED: &str = "Unexpected response from server";

/// Errors returned by `ApiClient` and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be built; nothing was sent.
    #[error("request configuration error: {0}")]
    Config(String),

    /// The backend signalled that the credential is no longer valid.
    #[error("session invalid: {}", .0.message)]
    SessionInvalid(Envelope),

    /// Well-formed reply whose code is neither success nor session-invalid.
    #[error("business failure ({:?}): {}", .0.code, .0.message)]
    Business(Envelope),

    /// A response arrived with a non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request was sent but no response came back.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The unwrapped payload did not fit the type the caller asked for.
    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("duplicate mock route {0}")]
    DuplicateMockRoute(String),
}

impl ApiError {
    /// Text shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Config(_) => MSG_CONFIG.to_string(),
            ApiError::SessionInvalid(env) => non_empty_or(&env.message, MSG_SESSION_EXPIRED),
            ApiError::Business(env) => non_empty_or(&env.message, MSG_BUSINESS),
            ApiError::Http { status, .. } => status_message(*status),
            ApiError::Network(_) => MSG_NETWORK.to_string(),
            ApiError::Timeout => MSG_TIMEOUT.to_string(),
            ApiError::MalformedEnvelope(_) | ApiError::Decode(_) => MSG_MALFORMED.to_string(),
            ApiError::Storage(msg) | ApiError::DuplicateMockRoute(msg) => msg.clone(),
        }
    }

    /// The envelope behind a session-invalid or business failure.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            ApiError::SessionInvalid(env) | ApiError::Business(env) => Some(env),
            _ => None,
        }
    }
}

/// Map a transport status to its fixed message.
pub fn status_message(status: u16) -> String {
    match status {
        401 => MSG_UNAUTHORIZED.to_string(),
        403 => MSG_FORBIDDEN.to_string(),
        404 => MSG_NOT_FOUND.to_string(),
        500 => MSG_SERVER_ERROR.to_string(),
        other => format!("Request failed with status {other}"),
    }
}

fn non_empty_or(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}
