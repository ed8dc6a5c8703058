//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport envelope. The
//! framing is **identical** across all OCPP versions (1.6, 2.0.1):
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! The codec is pure: parsing and serialization only, no I/O. Payloads are
//! kept as raw `serde_json::Value`; the dispatcher binds them per action.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Maximum length of an action name on the wire.
const MAX_ACTION_LEN: usize = 40;

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (version-agnostic transport envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;

        let arr = match value {
            Value::Array(arr) => arr,
            other => return Err(OcppFrameError::NotAnArray(type_name(&other))),
        };

        if arr.len() < 3 {
            return Err(OcppFrameError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }

        let msg_type = arr[0].as_u64().ok_or(OcppFrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(&arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(&arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(&arr),
            _ => Err(OcppFrameError::UnknownMessageType(msg_type)),
        }
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = parse_unique_id(&arr[1])?;
        let action = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("action must be a string"))?;
        if action.is_empty() || action.len() > MAX_ACTION_LEN || !action.is_ascii() {
            return Err(OcppFrameError::InvalidAction(action.to_string()));
        }
        let payload = arr[3].clone();

        Ok(Self::Call {
            unique_id,
            action: action.to_string(),
            payload,
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        let unique_id = parse_unique_id(&arr[1])?;
        let payload = arr[2].clone();

        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = parse_unique_id(&arr[1])?;
        let error_code = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("errorCode must be a string"))?
            .to_string();
        let error_description = arr[3].as_str().unwrap_or("").to_string();
        let error_details = arr
            .get(4)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    /// Best-effort extraction of the message id from a frame that failed to
    /// parse. Used to answer `FormationViolation` when the id is recoverable;
    /// callers fall back to dropping the frame when it is not.
    pub fn recover_unique_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let arr = value.as_array()?;
        arr.get(1)?.as_str().map(String::from)
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Create a `CallError` frame for a given unique ID.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Returns `true` if this is a `Call` frame.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` if this is a `CallResult` frame.
    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    /// Returns `true` if this is a `CallError` frame.
    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

fn parse_unique_id(value: &Value) -> Result<String, OcppFrameError> {
    value
        .as_str()
        .map(String::from)
        .ok_or(OcppFrameError::FieldTypeMismatch("uniqueId must be a string"))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error)]
pub enum OcppFrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message must be a JSON array, got {0}")]
    NotAnArray(&'static str),
    #[error("message type is not a number")]
    InvalidMessageType,
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
    #[error("invalid action name: {0:?}")]
    InvalidAction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargingStation":{"vendorName":"ACME","model":"X1"}}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargingStation"]["vendorName"], "ACME");
            }
            _ => panic!("Expected Call frame"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"abc123",{"status":"Accepted","currentTime":"2024-01-01T00:00:00Z","interval":300}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(payload["status"], "Accepted");
            }
            _ => panic!("Expected CallResult frame"),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn reject_non_array() {
        assert!(matches!(
            OcppFrame::parse(r#"{"messageType":2}"#),
            Err(OcppFrameError::NotAnArray("object"))
        ));
    }

    #[test]
    fn reject_short_array() {
        assert!(matches!(
            OcppFrame::parse(r#"[3,"id1"]"#),
            Err(OcppFrameError::MissingFields { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn reject_unknown_type_tag() {
        assert!(matches!(
            OcppFrame::parse(r#"[7,"id1",{}]"#),
            Err(OcppFrameError::UnknownMessageType(7))
        ));
    }

    #[test]
    fn reject_numeric_unique_id() {
        assert!(matches!(
            OcppFrame::parse(r#"[2,42,"Heartbeat",{}]"#),
            Err(OcppFrameError::FieldTypeMismatch(_))
        ));
    }

    #[test]
    fn reject_oversized_action() {
        let action = "A".repeat(41);
        let text = format!(r#"[2,"id1","{}",{{}}]"#, action);
        assert!(matches!(
            OcppFrame::parse(&text),
            Err(OcppFrameError::InvalidAction(_))
        ));
    }

    #[test]
    fn recover_id_from_malformed_call() {
        // Valid array, bad action type: the id is still recoverable.
        assert_eq!(
            OcppFrame::recover_unique_id(r#"[2,"id9",42,{}]"#),
            Some("id9".to_string())
        );
        // Numeric id is not recoverable as a string.
        assert_eq!(OcppFrame::recover_unique_id(r#"[2,42,"Heartbeat",{}]"#), None);
        // Not JSON at all.
        assert_eq!(OcppFrame::recover_unique_id("not json"), None);
    }

    #[test]
    fn roundtrip_call() {
        let frame = OcppFrame::Call {
            unique_id: "id1".into(),
            action: "Heartbeat".into(),
            payload: serde_json::json!({}),
        };
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrip_call_result() {
        let frame = OcppFrame::CallResult {
            unique_id: "id2".into(),
            payload: serde_json::json!({"currentTime": "2024-01-01T00:00:00Z"}),
        };
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrip_call_error() {
        let frame = OcppFrame::error_response("id3", "InternalError", "Something went wrong");
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert_eq!(parsed, frame);
    }
}
