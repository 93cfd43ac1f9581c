//! Wire contract for the pad endpoints.
//!
//! Both endpoints are plain HTTP POSTs with form-encoded bodies; the field
//! names (`_xsrf`, `sig`, `body`) are the de-facto protocol:
//!
//! ```text
//! POST /a/text/listen   _xsrf=<token>&sig=<last-seen>   → JSON TextSnapshot
//! POST /a/text/update   body=<text>&_xsrf=<token>       → "ok" (ignored)
//! ```
//!
//! The listen response is a JSON record with the current `body` and an
//! opaque `sig` token. Clients echo `sig` back on the next poll so the
//! server can tell "nothing changed since" and hold the request open.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cookie carrying the anti-forgery token.
///
/// The token is read fresh from this cookie on every outgoing request and
/// repeated in the `_xsrf` form field; the server rejects any mutating
/// request where the two disagree.
pub const XSRF_COOKIE: &str = "_xsrf";

/// Cookie identifying a session (a UUID issued on first page load).
pub const SESSION_COOKIE: &str = "session";

/// Current state of the shared buffer: the text plus its version token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSnapshot {
    pub body: String,
    /// Opaque server-issued signature of `body`.
    pub sig: String,
}

impl TextSnapshot {
    /// Build a snapshot for `body`, computing its signature.
    pub fn new(body: impl Into<String>) -> Self {
        let body = body.into();
        let sig = signature(&body);
        Self { body, sig }
    }

    /// Parse a listen-endpoint payload.
    ///
    /// Any unparseable payload is a [`ProtocolError::Malformed`]; callers
    /// treat that identically to a transport failure.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Request body for the listen endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenForm {
    #[serde(rename = "_xsrf")]
    pub xsrf: String,
    /// Last-seen signature; omitted on the very first poll.
    pub sig: Option<String>,
}

/// Request body for the update endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateForm {
    pub body: String,
    #[serde(rename = "_xsrf")]
    pub xsrf: String,
}

/// Signature of a buffer body: hex-encoded SHA-256 digest.
///
/// Opaque to clients; only compared for equality.
pub fn signature(body: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(body.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Request failed at the network/HTTP layer.
    Transport(String),
    /// Response payload could not be parsed as a [`TextSnapshot`].
    Malformed(String),
    /// Server answered with a non-success status.
    Status(u16),
    /// No `_xsrf` cookie available to attach to the request.
    MissingToken,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::Malformed(e) => write!(f, "Malformed response: {e}"),
            Self::Status(code) => write!(f, "Unexpected status: {code}"),
            Self::MissingToken => write!(f, "Missing XSRF token"),
        }
    }
}

impl std::error::Error for ProtocolError {}
