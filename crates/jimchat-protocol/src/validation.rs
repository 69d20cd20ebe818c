//! Structural validation of decoded payloads against the schema
//! tables.
//!
//! Validation checks key presence only, never value types or ranges.
//! It is applied to every inbound message after decoding and before
//! routing; the typed layer ([`crate::message`]) relies on it having
//! passed.

use serde_json::{Map, Value};

use jimchat_types::{JimError, Result};

use crate::schema::{self, keys, ActionKind};

/// Validates a decoded payload.
///
/// # Errors
///
/// - [`JimError::NotAMapping`] if the payload is not a JSON object.
/// - [`JimError::MissingFields`] naming exactly the required keys that
///   are absent for the identified action or response class.
/// - [`JimError::MalformedPayload`] if neither discriminant is present,
///   the action is unknown, the nested `user` is not an object, or the
///   `response` code is not an integer.
pub fn validate(msg: &Value) -> Result<()> {
    let obj = msg.as_object().ok_or(JimError::NotAMapping)?;

    if let Some(action) = obj.get(keys::ACTION) {
        validate_action(action, obj)
    } else if let Some(response) = obj.get(keys::RESPONSE) {
        validate_response(response, obj)
    } else {
        Err(JimError::MalformedPayload {
            reason: "missing 'action' or 'response' discriminant".into(),
        })
    }
}

fn validate_action(action: &Value, obj: &Map<String, Value>) -> Result<()> {
    let name = action.as_str().ok_or_else(|| JimError::MalformedPayload {
        reason: "'action' is not a string".into(),
    })?;

    let kind = ActionKind::parse(name).ok_or_else(|| JimError::MalformedPayload {
        reason: format!("unknown action '{name}'"),
    })?;

    check_required(kind.as_str(), kind.required_keys(), obj)?;

    if let Some(user_keys) = kind.required_user_keys() {
        let user = obj
            .get(keys::USER)
            .and_then(Value::as_object)
            .ok_or_else(|| JimError::MalformedPayload {
                reason: "'user' is not an object".into(),
            })?;
        check_required(kind.as_str(), user_keys, user)?;
    }

    Ok(())
}

fn validate_response(response: &Value, obj: &Map<String, Value>) -> Result<()> {
    let code = response.as_i64().ok_or_else(|| JimError::MalformedPayload {
        reason: "'response' is not an integer".into(),
    })?;

    let class = if schema::is_error_code(code) {
        keys::ERROR
    } else {
        keys::ALERT
    };

    check_required(class, schema::required_response_keys(code), obj)
}

/// Reports the required keys absent from `map`, sorted.
fn check_required(
    kind: &str,
    required: &'static [&'static str],
    map: &Map<String, Value>,
) -> Result<()> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|key| !map.contains_key(**key))
        .map(|key| (*key).to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort_unstable();
    Err(JimError::MissingFields {
        kind: kind.into(),
        missing,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
