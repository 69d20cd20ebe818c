//! Typed message layer: a tagged sum type per action, plus responses.
//!
//! Messages are value objects: built by smart constructors that
//! guarantee schema validity at creation time, never mutated after send; the only later change is the timestamp injection performed by
//! [`crate::codec::WireCodec::encode`].
//!
//! Conversion from decoded JSON goes through [`crate::validation`]
//! first, so a successful [`Frame::from_value`] implies the payload
//! satisfied the schema tables.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use jimchat_types::{JimError, Result, Timestamp};

use crate::schema::{keys, status};
use crate::validation;

// ---------------------------------------------------------------------------
// Nested user payloads
// ---------------------------------------------------------------------------

/// The `user` object of an `authenticate` action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub account_name: String,
    pub password: String,
}

/// The `user` object of a `presence` action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub account_name: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// The `msg` action payload. A standalone struct because the pending
/// store queues and persists it verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub time: Timestamp,
    pub from: String,
    pub to: String,
    pub message: String,
    pub encoding: String,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request action, tagged by its `action` discriminant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Authenticate {
        time: Timestamp,
        user: AuthCredentials,
    },
    Presence {
        time: Timestamp,
        user: PresenceStatus,
    },
    Probe {
        time: Timestamp,
    },
    Quit {
        time: Timestamp,
    },
    #[serde(rename = "msg")]
    Msg(ChatMessage),
    Join {
        time: Timestamp,
        room: String,
    },
    Leave {
        time: Timestamp,
        room: String,
    },
}

impl Request {
    /// Builds a presence handshake for `account_name`.
    pub fn presence(account_name: &str, status: &str) -> Self {
        Self::Presence {
            time: Timestamp::now(),
            user: PresenceStatus {
                account_name: account_name.into(),
                status: status.into(),
            },
        }
    }

    /// Builds an authenticate handshake for `account_name`.
    pub fn authenticate(account_name: &str, password: &str) -> Self {
        Self::Authenticate {
            time: Timestamp::now(),
            user: AuthCredentials {
                account_name: account_name.into(),
                password: password.into(),
            },
        }
    }

    /// Builds a liveness probe.
    pub fn probe() -> Self {
        Self::Probe {
            time: Timestamp::now(),
        }
    }

    /// Builds an orderly-disconnect notice.
    pub fn quit() -> Self {
        Self::Quit {
            time: Timestamp::now(),
        }
    }

    /// Builds a chat message in UTF-8 encoding.
    pub fn msg(from: &str, to: &str, text: &str) -> Self {
        Self::Msg(ChatMessage {
            time: Timestamp::now(),
            from: from.into(),
            to: to.into(),
            message: text.into(),
            encoding: "utf-8".into(),
        })
    }

    /// Builds a room join request (schema-valid, rejected by the
    /// server router).
    pub fn join(room: &str) -> Self {
        Self::Join {
            time: Timestamp::now(),
            room: room.into(),
        }
    }

    /// Builds a room leave request (schema-valid, rejected by the
    /// server router).
    pub fn leave(room: &str) -> Self {
        Self::Leave {
            time: Timestamp::now(),
            room: room.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A reply message: an HTTP-status-like code plus `alert` (2xx/3xx) or
/// `error` (4xx/5xx) text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: Timestamp,
}

impl Response {
    /// Builds a response for `code`. An empty description falls back to
    /// the canonical status phrase. The alert/error split follows the
    /// status class, so the result always satisfies the schema.
    pub fn with_code(code: u16, description: &str) -> Self {
        let text = if description.is_empty() {
            status::phrase(code).to_string()
        } else {
            description.to_string()
        };

        let is_error = (400..600).contains(&code);
        Self {
            response: code,
            alert: (!is_error).then(|| text.clone()),
            error: is_error.then_some(text),
            time: Timestamp::now(),
        }
    }

    /// 200 OK.
    pub fn ok() -> Self {
        Self::with_code(status::OK, "")
    }

    /// 400 Bad Request.
    pub fn bad_request() -> Self {
        Self::with_code(status::BAD_REQUEST, "")
    }

    /// 403 Forbidden with a description.
    pub fn forbidden(description: &str) -> Self {
        Self::with_code(status::FORBIDDEN, description)
    }

    /// 500 Internal Server Error with a description.
    pub fn server_error(description: &str) -> Self {
        Self::with_code(status::INTERNAL_SERVER_ERROR, description)
    }

    /// The alert or error text, whichever the class carries.
    pub fn text(&self) -> &str {
        self.alert
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }

    /// True for 4xx/5xx responses.
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.response)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded wire message: either a request action or a response.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
}

impl Frame {
    /// Validates a decoded payload and converts it into its typed
    /// form, dispatching on the `action`/`response` discriminant.
    pub fn from_value(value: Value) -> Result<Self> {
        validation::validate(&value)?;

        if value.get(keys::ACTION).is_some() {
            let request: Request =
                serde_json::from_value(value).map_err(|e| JimError::MalformedPayload {
                    reason: format!("request does not match its schema: {e}"),
                })?;
            Ok(Self::Request(request))
        } else {
            let response: Response =
                serde_json::from_value(value).map_err(|e| JimError::MalformedPayload {
                    reason: format!("response does not match its schema: {e}"),
                })?;
            Ok(Self::Response(response))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
