//! The `{code, message, data}` envelope every backend reply is wrapped in,
//! and the classification step that decides what a reply means.
//!
//! # Design
//! Classification is a separate, total step: an `Envelope` is turned into
//! exactly one `Classified` variant before anything is unwrapped. The
//! sentinels and the message field name are owned by `EnvelopePolicy`, so the
//! canonical shape (`message`, success `200`) and the legacy shape (`msg`,
//! success `0`) never mix inside one client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

pub const SUCCESS_CODE: i64 = 200;
pub const LEGACY_SUCCESS_CODE: i64 = 0;
pub const SESSION_INVALID_CODE: i64 = 500_001;

/// Status code carried by an envelope. Backends send either a JSON number or
/// a string; numeric strings compare equal to the number they spell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Code {
    Number(i64),
    Text(String),
}

impl Code {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Code::Number(n) => Some(*n),
            Code::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for Code {
    fn from(n: i64) -> Self {
        Code::Number(n)
    }
}

impl From<i32> for Code {
    fn from(n: i32) -> Self {
        Code::Number(i64::from(n))
    }
}

impl From<&str> for Code {
    fn from(s: &str) -> Self {
        Code::Text(s.to_string())
    }
}

/// A backend reply in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: Code,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(code: impl Into<Code>, message: impl Into<String>, data: Value) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data,
        }
    }
}

/// Outcome of classifying an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// The credential is no longer valid and must be evicted.
    SessionInvalid(Envelope),
    /// The nested payload, already unwrapped.
    Success(Value),
    BusinessFailure(Envelope),
}

/// Which envelope convention a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopePolicy {
    pub success_code: i64,
    pub session_invalid_code: i64,
    /// JSON field holding the human-readable message.
    pub message_field: &'static str,
}

impl Default for EnvelopePolicy {
    fn default() -> Self {
        Self {
            success_code: SUCCESS_CODE,
            session_invalid_code: SESSION_INVALID_CODE,
            message_field: "message",
        }
    }
}

impl EnvelopePolicy {
    /// Adapter for backends that report success as `0` and name the message
    /// field `msg`.
    pub fn legacy() -> Self {
        Self {
            success_code: LEGACY_SUCCESS_CODE,
            session_invalid_code: SESSION_INVALID_CODE,
            message_field: "msg",
        }
    }

    /// Parse a response body into an envelope.
    pub fn parse(&self, body: &[u8]) -> Result<Envelope, ApiError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ApiError::MalformedEnvelope(e.to_string()))?;
        self.read_value(value)
    }

    /// Read an envelope out of an arbitrary JSON value. A missing `code` is an
    /// error, never an implicit zero.
    pub fn read_value(&self, value: Value) -> Result<Envelope, ApiError> {
        let Value::Object(mut fields) = value else {
            return Err(ApiError::MalformedEnvelope("envelope is not a JSON object".to_string()));
        };

        let code = match fields.remove("code") {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Code::Number)
                .ok_or_else(|| ApiError::MalformedEnvelope(format!("non-integer code {n}")))?,
            Some(Value::String(s)) => Code::Text(s),
            Some(other) => {
                return Err(ApiError::MalformedEnvelope(format!("unsupported code {other}")));
            }
            None => return Err(ApiError::MalformedEnvelope("missing code".to_string())),
        };

        let message = match fields.remove(self.message_field) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let data = fields.remove("data").unwrap_or(Value::Null);

        Ok(Envelope { code, message, data })
    }

    pub fn classify(&self, envelope: Envelope) -> Classified {
        match envelope.code.as_i64() {
            Some(code) if code == self.session_invalid_code => Classified::SessionInvalid(envelope),
            Some(code) if code == self.success_code => Classified::Success(envelope.data),
            _ => Classified::BusinessFailure(envelope),
        }
    }
}
