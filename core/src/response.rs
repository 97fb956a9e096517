//! Response envelope handling for service-to-service calls.
//!
//! Peers wrap payloads as `{ "ok": bool, "data": T, "timestamp": ... }` at the
//! boundary. Callers strip that wrapper before use with [`unwrap_response`],
//! which is idempotent: feeding it an already-unwrapped value returns the value
//! unchanged, and double-wrapped payloads collapse to the innermost `data`.

use serde_json::Value;
use std::fmt;

/// How a response schema mismatch is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Mismatch fails the call. Used during development.
    #[default]
    Strict,
    /// Mismatch is logged and the unvalidated data is returned. Used once a service is live.
    Lenient,
}

impl ValidationMode {
    /// Whether a mismatch is a hard error.
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

/// Whether `value` has the `{ ok: bool, data }` envelope shape.
#[must_use]
pub fn is_envelope(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.get("ok").is_some_and(Value::is_boolean) && obj.contains_key("data"))
}

/// Strip every layer of response envelope from `value`.
#[must_use]
pub fn unwrap_response(mut value: Value) -> Value {
    while is_envelope(&value) {
        value = match value {
            Value::Object(mut obj) => obj.remove("data").unwrap_or(Value::Null),
            other => return other,
        };
    }
    value
}
