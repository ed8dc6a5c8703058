//! OCPP protocol versions supported by this central system.

use std::fmt;

/// Negotiated OCPP protocol version of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcppVersion {
    /// OCPP 1.6 (legacy fallback)
    V16,
    /// OCPP 2.0.1
    V201,
}

impl OcppVersion {
    /// The canonical `Sec-WebSocket-Protocol` token for this version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
        }
    }

    /// Map a requested subprotocol token to a version.
    ///
    /// `ocpp2.0` is accepted as an alias for 2.0.1 since some stations advertise
    /// the shortened token.
    pub fn from_subprotocol(token: &str) -> Option<Self> {
        match token {
            "ocpp2.0.1" | "ocpp2.0" => Some(Self::V201),
            "ocpp1.6" => Some(Self::V16),
            _ => None,
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V16 => write!(f, "1.6"),
            Self::V201 => write!(f, "2.0.1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_aliases() {
        assert_eq!(OcppVersion::from_subprotocol("ocpp2.0.1"), Some(OcppVersion::V201));
        assert_eq!(OcppVersion::from_subprotocol("ocpp2.0"), Some(OcppVersion::V201));
        assert_eq!(OcppVersion::from_subprotocol("ocpp1.6"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::from_subprotocol("ocpp1.5"), None);
    }
}
