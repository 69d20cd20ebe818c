//! Core shared types for the jimchat messaging system.
//!
//! This crate defines the types used across the workspace: the central
//! error enum, the `Result` alias, the wire timestamp, and the
//! configuration structs. No other crate should define shared types;
//! everything lives here.

pub mod config;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// The `time` field of a JIM message, in either of its two wire forms.
///
/// A message is created with a Unix epoch timestamp (seconds as f64);
/// the codec overwrites it with a fresh epoch value at encode time and
/// renders it to an ISO-8601 string at decode time. Both forms are
/// representable so that a message survives a round trip through the
/// pending store without losing its decoded shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Unix epoch seconds, the form a sender stamps at encode time.
    Epoch(f64),
    /// ISO-8601 string, the form produced by decoding.
    Iso(String),
}

impl Timestamp {
    /// Returns the current time as an epoch timestamp.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::Epoch(secs)
    }

    /// Returns the epoch seconds if this is the epoch form.
    pub fn epoch_secs(&self) -> Option<f64> {
        match self {
            Self::Epoch(secs) => Some(*secs),
            Self::Iso(_) => None,
        }
    }

    /// Returns the ISO-8601 string if this is the decoded form.
    pub fn as_iso(&self) -> Option<&str> {
        match self {
            Self::Epoch(_) => None,
            Self::Iso(s) => Some(s),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(secs) => write!(f, "{secs}"),
            Self::Iso(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// JimError
// ---------------------------------------------------------------------------

/// Central error type for the jimchat system.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum, ensuring a unified error handling surface.
/// The protocol-level variants (`NotAMapping`, `MissingFields`,
/// `MalformedPayload`, `FrameTooLarge`) are recoverable per message:
/// the server answers them with an error response and keeps the
/// connection open. Transport-level variants are fatal to the affected
/// connection only.
#[derive(Debug, Error)]
pub enum JimError {
    /// The decoded payload is valid JSON but not a key/value mapping.
    #[error("message is not a key/value mapping")]
    NotAMapping,

    /// Required keys for the identified message kind are absent.
    #[error("message of kind '{kind}' is missing required fields: {missing:?}")]
    MissingFields {
        /// The action name or response-severity class being validated.
        kind: String,
        /// The absent keys, sorted.
        missing: Vec<String>,
    },

    /// The payload is not valid JSON, lacks a discriminant, or has a
    /// malformed sub-structure.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Human-readable description of the defect.
        reason: String,
    },

    /// The peer performed an orderly shutdown (zero-byte read).
    #[error("peer closed the connection")]
    PeerClosed,

    /// An encoded frame exceeds the maximum wire size.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Actual encoded length.
        len: usize,
        /// Configured maximum frame length.
        max: usize,
    },

    /// The server answered a session handshake with an error response.
    #[error("session rejected by server: {code} {reason}")]
    SessionRejected {
        /// HTTP-status-like response code.
        code: u16,
        /// The server's error description.
        reason: String,
    },

    /// A socket read or write failed.
    #[error("transport error: {reason}")]
    TransportError {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// A storage or persistence operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

impl JimError {
    /// True for errors that are recoverable per message: the connection
    /// stays open and the peer receives an error response.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::NotAMapping
                | Self::MissingFields { .. }
                | Self::MalformedPayload { .. }
                | Self::FrameTooLarge { .. }
        )
    }
}

impl From<std::io::Error> for JimError {
    fn from(err: std::io::Error) -> Self {
        Self::TransportError {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`JimError`].
pub type Result<T> = std::result::Result<T, JimError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_now_is_epoch() {
        let ts = Timestamp::now();
        assert!(ts.epoch_secs().is_some());
        assert!(ts.as_iso().is_none());
    }

    #[test]
    fn timestamp_serde_epoch_form() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::Epoch(42.5);
        let json = serde_json::to_string(&ts)?;
        assert_eq!(json, "42.5");
        let parsed: Timestamp = serde_json::from_str(&json)?;
        assert_eq!(ts, parsed);
        Ok(())
    }

    #[test]
    fn timestamp_serde_iso_form() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::Iso("1970-01-01T03:00:00".into());
        let json = serde_json::to_string(&ts)?;
        assert_eq!(json, "\"1970-01-01T03:00:00\"");
        let parsed: Timestamp = serde_json::from_str(&json)?;
        assert_eq!(ts, parsed);
        Ok(())
    }

    #[test]
    fn missing_fields_display_names_fields() {
        let err = JimError::MissingFields {
            kind: "msg".into(),
            missing: vec!["to".into(), "encoding".into()],
        };
        let text = err.to_string();
        assert!(text.contains("msg"));
        assert!(text.contains("to"));
        assert!(text.contains("encoding"));
    }

    #[test]
    fn protocol_errors_are_recoverable() {
        assert!(JimError::NotAMapping.is_protocol());
        assert!(JimError::MalformedPayload {
            reason: "x".into()
        }
        .is_protocol());
        assert!(!JimError::PeerClosed.is_protocol());
        assert!(!JimError::TransportError {
            reason: "x".into()
        }
        .is_protocol());
    }

    #[test]
    fn io_error_becomes_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: JimError = io.into();
        assert!(matches!(err, JimError::TransportError { .. }));
    }
}
