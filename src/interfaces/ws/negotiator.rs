//! OCPP subprotocol negotiation.
//!
//! During the WebSocket handshake the station advertises the OCPP
//! versions it speaks via `Sec-WebSocket-Protocol`. The negotiator picks
//! the highest mutually-supported version and remembers the exact token
//! that matched so it can be echoed back.

use crate::domain::OcppVersion;

pub struct ProtocolNegotiator {
    /// Supported versions in preference order (highest first).
    supported: Vec<OcppVersion>,
}

impl ProtocolNegotiator {
    pub fn new(supported: Vec<OcppVersion>) -> Self {
        Self { supported }
    }

    /// Pick the best mutual version from a `Sec-WebSocket-Protocol` header
    /// value. Returns the version and the requested token that selected it.
    pub fn negotiate(&self, requested: &str) -> Option<(OcppVersion, String)> {
        let tokens: Vec<&str> = requested.split(',').map(|t| t.trim()).collect();

        for version in &self.supported {
            for token in &tokens {
                if OcppVersion::from_subprotocol(token) == Some(*version) {
                    return Some((*version, token.to_string()));
                }
            }
        }
        None
    }

    pub fn supported_versions(&self) -> &[OcppVersion] {
        &self.supported
    }
}

impl Default for ProtocolNegotiator {
    fn default() -> Self {
        Self::new(vec![OcppVersion::V201, OcppVersion::V16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_match() {
        let negotiator = ProtocolNegotiator::default();
        assert_eq!(
            negotiator.negotiate("ocpp1.6"),
            Some((OcppVersion::V16, "ocpp1.6".to_string()))
        );
    }

    #[test]
    fn multiple_prefers_highest() {
        let negotiator = ProtocolNegotiator::default();
        // Station supports both; pick 2.0.1, the highest mutual version.
        assert_eq!(
            negotiator.negotiate("ocpp1.6, ocpp2.0.1"),
            Some((OcppVersion::V201, "ocpp2.0.1".to_string()))
        );
    }

    #[test]
    fn alias_token_is_preserved() {
        let negotiator = ProtocolNegotiator::default();
        assert_eq!(
            negotiator.negotiate("ocpp2.0"),
            Some((OcppVersion::V201, "ocpp2.0".to_string()))
        );
    }

    #[test]
    fn no_match_or_empty() {
        let negotiator = ProtocolNegotiator::default();
        assert_eq!(negotiator.negotiate("ocpp1.5"), None);
        assert_eq!(negotiator.negotiate(""), None);
    }
}
