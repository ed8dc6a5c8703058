//! Error kinds of the session and command-correlation core.

use thiserror::Error;

/// OCPP-J CallError codes this central system emits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppErrorCode {
    NotImplemented,
    FormationViolation,
    ProtocolError,
    InternalError,
    SecurityError,
}

impl OcppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::FormationViolation => "FormationViolation",
            Self::ProtocolError => "ProtocolError",
            Self::InternalError => "InternalError",
            Self::SecurityError => "SecurityError",
        }
    }
}

impl std::fmt::Display for OcppErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error kinds. Transport errors kill only the affected session;
/// repository errors keep their kind; timeouts never cascade.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("action not implemented: {0}")]
    NotImplemented(String),

    #[error("charge point {0} is not connected")]
    NotConnected(String),

    #[error("call timed out")]
    Timeout,

    #[error("session closed")]
    SessionClosed,

    #[error("outbound queue full")]
    Busy,

    #[error("authorization failed for token {0}")]
    AuthorizationFailed(String),

    /// The charger answered the Call with a CallError frame.
    #[error("charger replied CallError {code}: {description}")]
    CallError { code: String, description: String },

    #[error("firmware update already in flight (request {0})")]
    JobInFlight(i32),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Protocol(e.to_string())
    }
}

/// Fault raised by an inbound-Call handler; the dispatcher turns it into a
/// CallError reply on the owning session.
#[derive(Debug)]
pub struct CallFault {
    pub code: OcppErrorCode,
    pub description: String,
}

impl CallFault {
    pub fn protocol(description: impl Into<String>) -> Self {
        Self {
            code: OcppErrorCode::ProtocolError,
            description: description.into(),
        }
    }

    pub fn formation(description: impl Into<String>) -> Self {
        Self {
            code: OcppErrorCode::FormationViolation,
            description: description.into(),
        }
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self {
            code: OcppErrorCode::InternalError,
            description: description.into(),
        }
    }

    pub fn not_implemented(action: &str) -> Self {
        Self {
            code: OcppErrorCode::NotImplemented,
            description: format!("Action {} is not supported", action),
        }
    }
}
