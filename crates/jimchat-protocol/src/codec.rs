//! Wire framing: JSON serialization with timestamp normalization.
//!
//! One `send`/`recv` is assumed to carry exactly one JSON document of
//! at most [`MAX_FRAME_LEN`] bytes; there is no length prefix or
//! delimiter. This is a known fragility of the protocol and is
//! preserved as-is.
//!
//! # Timestamp rule
//!
//! [`WireCodec::encode`] overwrites the `time` key with the current
//! Unix epoch seconds, whatever the message carried before.
//! [`WireCodec::decode`] replaces the numeric `time` (0 when absent)
//! with an ISO-8601 string rendered in the codec's timezone offset.

use chrono::{FixedOffset, Offset, TimeZone, Timelike};
use serde::Serialize;
use serde_json::{Map, Value};

use jimchat_types::{JimError, Result, Timestamp};

use crate::schema::keys;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of one encoded frame in bytes.
pub const MAX_FRAME_LEN: usize = 1280;

// ---------------------------------------------------------------------------
// WireCodec
// ---------------------------------------------------------------------------

/// Frames JSON messages to and from byte buffers.
///
/// The codec carries its configuration explicitly: the maximum frame
/// length and the timezone offset used to render decoded timestamps.
/// Production code uses [`WireCodec::new`] (local offset); tests pin a
/// fixed offset via [`WireCodec::with_offset`].
#[derive(Clone, Debug)]
pub struct WireCodec {
    max_frame_len: usize,
    tz_offset: FixedOffset,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    /// Creates a codec rendering timestamps in the local timezone.
    pub fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            tz_offset: chrono::Local::now().offset().fix(),
        }
    }

    /// Creates a codec rendering timestamps in a fixed offset.
    pub fn with_offset(tz_offset: FixedOffset) -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            tz_offset,
        }
    }

    /// Returns the configured maximum frame length.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Serializes a message to UTF-8 JSON, stamping `time` with the
    /// current epoch seconds.
    ///
    /// # Errors
    ///
    /// - [`JimError::MalformedPayload`] if the message does not
    ///   serialize to a JSON object.
    /// - [`JimError::FrameTooLarge`] if the encoded frame exceeds the
    ///   maximum length.
    pub fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>> {
        let mut value =
            serde_json::to_value(msg).map_err(|e| JimError::MalformedPayload {
                reason: format!("failed to serialize message: {e}"),
            })?;

        let map = value
            .as_object_mut()
            .ok_or_else(|| JimError::MalformedPayload {
                reason: "message did not serialize to a JSON object".into(),
            })?;

        let now = Timestamp::now().epoch_secs().unwrap_or(0.0);
        map.insert(keys::TIME.into(), Value::from(now));

        let raw = serde_json::to_vec(&value).map_err(|e| JimError::MalformedPayload {
            reason: format!("failed to serialize message: {e}"),
        })?;

        if raw.len() > self.max_frame_len {
            return Err(JimError::FrameTooLarge {
                len: raw.len(),
                max: self.max_frame_len,
            });
        }

        Ok(raw)
    }

    /// Parses a received frame into a JSON object, converting the
    /// numeric `time` into an ISO-8601 string.
    ///
    /// A missing `time` is treated as epoch 0, mirroring the original
    /// protocol. A `time` that is present but not numeric cannot be
    /// rendered and is rejected.
    ///
    /// # Errors
    ///
    /// [`JimError::MalformedPayload`] if the bytes are not valid UTF-8
    /// JSON, not a top-level object, or carry a non-numeric `time`.
    pub fn decode(&self, raw: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(raw).map_err(|e| JimError::MalformedPayload {
            reason: format!("frame is not valid UTF-8: {e}"),
        })?;

        let mut value: Value =
            serde_json::from_str(text).map_err(|e| JimError::MalformedPayload {
                reason: format!("frame is not valid JSON: {e}"),
            })?;

        let map: &mut Map<String, Value> =
            value
                .as_object_mut()
                .ok_or_else(|| JimError::MalformedPayload {
                    reason: "frame is not a top-level JSON object".into(),
                })?;

        let epoch = match map.get(keys::TIME) {
            None => 0.0,
            Some(Value::Number(n)) => {
                n.as_f64().ok_or_else(|| JimError::MalformedPayload {
                    reason: "'time' is out of the representable range".into(),
                })?
            }
            Some(other) => {
                return Err(JimError::MalformedPayload {
                    reason: format!("'time' must be numeric, got {other}"),
                })
            }
        };

        let iso = self.render_iso(epoch)?;
        map.insert(keys::TIME.into(), Value::String(iso));

        Ok(value)
    }

    /// Renders epoch seconds as an ISO-8601 string in the codec's
    /// offset. Sub-second precision is included only when present,
    /// truncated to microseconds.
    fn render_iso(&self, epoch_secs: f64) -> Result<String> {
        let whole = epoch_secs.floor();
        let nanos = (((epoch_secs - whole) * 1e9).round() as u32).min(999_999_999);

        let dt = self
            .tz_offset
            .timestamp_opt(whole as i64, nanos)
            .single()
            .ok_or_else(|| JimError::MalformedPayload {
                reason: format!("timestamp {epoch_secs} is out of range"),
            })?;

        let rendered = if dt.nanosecond() == 0 {
            dt.format("%Y-%m-%dT%H:%M:%S").to_string()
        } else {
            dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
        };

        Ok(rendered)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// UTC+3 fixture, matching the reference timezone.
    fn fixture_codec() -> WireCodec {
        let offset = FixedOffset::east_opt(3 * 3600).expect("valid offset");
        WireCodec::with_offset(offset)
    }

    #[test]
    fn decode_renders_epoch_zero_at_utc_plus_3() -> Result<()> {
        let codec = fixture_codec();
        let value = codec.decode(br#"{"action":"probe","time":0}"#)?;
        assert_eq!(value[keys::TIME], "1970-01-01T03:00:00");
        Ok(())
    }

    #[test]
    fn decode_defaults_missing_time_to_epoch_zero() -> Result<()> {
        let codec = fixture_codec();
        let value = codec.decode(br#"{"action":"probe"}"#)?;
        assert_eq!(value[keys::TIME], "1970-01-01T03:00:00");
        Ok(())
    }

    #[test]
    fn decode_keeps_subsecond_precision() -> Result<()> {
        let codec = fixture_codec();
        let value = codec.decode(br#"{"action":"probe","time":0.5}"#)?;
        assert_eq!(value[keys::TIME], "1970-01-01T03:00:00.500000");
        Ok(())
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let codec = fixture_codec();
        let err = codec.decode(b"this is not json").unwrap_err();
        assert!(matches!(err, JimError::MalformedPayload { .. }));
    }

    #[test]
    fn decode_rejects_non_object() {
        let codec = fixture_codec();
        let err = codec.decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, JimError::MalformedPayload { .. }));
    }

    #[test]
    fn decode_rejects_string_time() {
        let codec = fixture_codec();
        let err = codec
            .decode(br#"{"action":"probe","time":"yesterday"}"#)
            .unwrap_err();
        assert!(matches!(err, JimError::MalformedPayload { .. }));
    }

    #[test]
    fn encode_stamps_fresh_epoch_time() -> Result<()> {
        let codec = fixture_codec();
        let msg = serde_json::json!({"action": "probe", "time": 0});
        let raw = codec.encode(&msg)?;

        let parsed: Value = serde_json::from_slice(&raw).expect("valid json");
        let stamped = parsed[keys::TIME].as_f64().expect("numeric time");
        assert!(stamped > 1.0e9, "time must be overwritten with now");
        Ok(())
    }

    #[test]
    fn encode_rejects_oversized_frame() {
        let codec = fixture_codec();
        let msg = serde_json::json!({
            "action": "msg",
            "message": "x".repeat(MAX_FRAME_LEN),
        });
        let err = codec.encode(&msg).unwrap_err();
        assert!(matches!(err, JimError::FrameTooLarge { .. }));
    }

    #[test]
    fn encode_rejects_non_object() {
        let codec = fixture_codec();
        let err = codec.encode(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, JimError::MalformedPayload { .. }));
    }
}
