//! Message schema: key names, action kinds, required-field tables, and
//! status codes.
//!
//! The required-key sets are fixed lookup tables. Validation against
//! them is structural only: key presence, never value types or ranges
//! (see [`crate::validation`]).

// ---------------------------------------------------------------------------
// Wire keys
// ---------------------------------------------------------------------------

/// Top-level and nested key names used on the wire.
pub mod keys {
    pub const ACTION: &str = "action";
    pub const TIME: &str = "time";
    pub const USER: &str = "user";
    pub const ACCOUNT_NAME: &str = "account_name";
    pub const PASSWORD: &str = "password";
    pub const STATUS: &str = "status";
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const ROOM: &str = "room";
    pub const ENCODING: &str = "encoding";
    pub const MESSAGE: &str = "message";
    pub const RESPONSE: &str = "response";
    pub const ALERT: &str = "alert";
    pub const ERROR: &str = "error";
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The closed set of request actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ActionKind {
    Authenticate,
    Presence,
    Probe,
    Quit,
    Msg,
    Join,
    Leave,
}

impl ActionKind {
    /// All action kinds, in schema-table order.
    pub const ALL: [ActionKind; 7] = [
        Self::Authenticate,
        Self::Presence,
        Self::Probe,
        Self::Quit,
        Self::Msg,
        Self::Join,
        Self::Leave,
    ];

    /// The wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Presence => "presence",
            Self::Probe => "probe",
            Self::Quit => "quit",
            Self::Msg => "msg",
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }

    /// Parses a wire action name. Returns `None` for unknown actions.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }

    /// Required top-level keys for this action.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Authenticate | Self::Presence => {
                &[keys::ACTION, keys::TIME, keys::USER]
            }
            Self::Probe | Self::Quit => &[keys::ACTION, keys::TIME],
            Self::Msg => &[
                keys::ACTION,
                keys::TIME,
                keys::FROM,
                keys::TO,
                keys::MESSAGE,
                keys::ENCODING,
            ],
            Self::Join | Self::Leave => &[keys::ACTION, keys::TIME, keys::ROOM],
        }
    }

    /// Required keys of the nested `user` object, for the actions that
    /// carry one.
    pub fn required_user_keys(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Authenticate => Some(&[keys::ACCOUNT_NAME, keys::PASSWORD]),
            Self::Presence => Some(&[keys::ACCOUNT_NAME, keys::STATUS]),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Response classes
// ---------------------------------------------------------------------------

/// True if a status code belongs to the error class (4xx/5xx), whose
/// responses carry `error` instead of `alert`.
pub fn is_error_code(code: i64) -> bool {
    (400..600).contains(&code)
}

/// Required top-level keys for a response with the given status code.
pub fn required_response_keys(code: i64) -> &'static [&'static str] {
    if is_error_code(code) {
        &[keys::RESPONSE, keys::ERROR, keys::TIME]
    } else {
        &[keys::RESPONSE, keys::ALERT, keys::TIME]
    }
}

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// HTTP-like status codes used in responses.
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const FORBIDDEN: u16 = 403;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    /// Canonical phrase for a status code, used when a response is
    /// built without an explicit description.
    pub fn phrase(code: u16) -> &'static str {
        match code {
            OK => "OK",
            BAD_REQUEST => "Bad Request",
            FORBIDDEN => "Forbidden",
            INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "",
        }
    }
}
