//! Connection admission control.
//!
//! Pre-upgrade checks, in order: subprotocol negotiation, Origin
//! allow-list, charge-point id extraction from the request path, id
//! allow-list, per-IP connection cap. The per-IP counter is taken here
//! and released when the session's connection task finishes.

use std::net::IpAddr;

use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

use crate::domain::OcppVersion;

use super::negotiator::ProtocolNegotiator;

/// Security knobs from the application configuration.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Origin patterns: exact value, `*`, or `*.domain` suffix. An empty
    /// list rejects every browser-sent Origin; requests without an Origin
    /// header (non-browser clients) always pass this check.
    pub allowed_origins: Vec<String>,
    /// Empty = discovery mode, accept any station id.
    pub allowed_charge_point_ids: Vec<String>,
    pub require_subprotocol: bool,
    pub max_connections_per_ip: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_charge_point_ids: Vec::new(),
            require_subprotocol: true,
            max_connections_per_ip: 10,
        }
    }
}

/// Why an upgrade was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("missing or unsupported OCPP subprotocol")]
    MissingSubprotocol,
    #[error("origin {0} is not allowed")]
    OriginNotAllowed(String),
    /// An allow-list is configured and the request path carries no id.
    #[error("charge point id required")]
    Unauthorized,
    /// No allow-list is configured; the path is simply malformed.
    #[error("no charge point id in request path")]
    MissingChargePointId,
    #[error("charge point {0} is not on the allow-list")]
    ChargePointNotAllowed(String),
    #[error("too many connections from {0}")]
    TooManyConnections(IpAddr),
}

/// A successfully admitted upgrade.
#[derive(Debug, Clone)]
pub struct Admission {
    pub charge_point_id: String,
    pub version: OcppVersion,
    /// The requested subprotocol token to echo back, verbatim.
    pub subprotocol: Option<String>,
    pub client_ip: IpAddr,
}

pub struct AdmissionControl {
    config: SecurityConfig,
    negotiator: ProtocolNegotiator,
    per_ip: DashMap<IpAddr, usize>,
}

impl AdmissionControl {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            negotiator: ProtocolNegotiator::default(),
            per_ip: DashMap::new(),
        }
    }

    /// Run the admission checks; on success the per-IP counter has been
    /// taken and must be released with [`AdmissionControl::release`].
    pub fn admit(
        &self,
        path: &str,
        subprotocols: Option<&str>,
        origin: Option<&str>,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        peer: IpAddr,
    ) -> Result<Admission, AdmissionError> {
        // 1. Subprotocol negotiation.
        let negotiated = subprotocols.and_then(|header| self.negotiator.negotiate(header));
        if self.config.require_subprotocol && negotiated.is_none() {
            return Err(AdmissionError::MissingSubprotocol);
        }

        // 2. Origin allow-list; absent Origin is a non-browser client.
        if let Some(origin) = origin {
            if !origin_allowed(&self.config.allowed_origins, origin) {
                return Err(AdmissionError::OriginNotAllowed(origin.to_string()));
            }
        }

        // 3. Charge point id from the path; the 1.6 legacy path pins the
        // version regardless of the offered tokens. With an allow-list
        // configured, an absent id is an authorization failure, not a
        // routing one.
        let (charge_point_id, legacy) = match extract_charge_point_id(path) {
            Some(extracted) => extracted,
            None if !self.config.allowed_charge_point_ids.is_empty() => {
                return Err(AdmissionError::Unauthorized)
            }
            None => return Err(AdmissionError::MissingChargePointId),
        };
        if !self.config.allowed_charge_point_ids.is_empty()
            && !self
                .config
                .allowed_charge_point_ids
                .iter()
                .any(|id| id == &charge_point_id)
        {
            return Err(AdmissionError::ChargePointNotAllowed(charge_point_id));
        }

        let (version, subprotocol) = if legacy {
            (OcppVersion::V16, Some(OcppVersion::V16.subprotocol().to_string()))
        } else {
            match negotiated {
                Some((version, token)) => (version, Some(token)),
                None => (OcppVersion::V201, None),
            }
        };

        // 4. Per-IP connection cap.
        let client_ip = resolve_client_ip(forwarded_for, real_ip, peer);
        {
            let mut count = self.per_ip.entry(client_ip).or_insert(0);
            if *count >= self.config.max_connections_per_ip {
                warn!(%client_ip, count = *count, "Per-IP connection cap hit");
                return Err(AdmissionError::TooManyConnections(client_ip));
            }
            *count += 1;
        }

        Ok(Admission {
            charge_point_id,
            version,
            subprotocol,
            client_ip,
        })
    }

    /// Return a connection slot taken by `admit`.
    pub fn release(&self, client_ip: IpAddr) {
        let drained = match self.per_ip.get_mut(&client_ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => return,
        };
        if drained {
            self.per_ip.remove_if(&client_ip, |_, count| *count == 0);
        }
    }

    pub fn connections_from(&self, client_ip: IpAddr) -> usize {
        self.per_ip.get(&client_ip).map(|c| *c).unwrap_or(0)
    }
}

/// Charge point id from `/ocpp/{id}` or the legacy `/ocpp/1.6/{id}`.
fn extract_charge_point_id(path: &str) -> Option<(String, bool)> {
    let rest = path.trim_start_matches('/').strip_prefix("ocpp/")?;
    if let Some(id) = rest.strip_prefix("1.6/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some((id.to_string(), true));
        }
        return None;
    }
    let id = rest.trim_matches('/');
    if !id.is_empty() && !id.contains('/') {
        return Some((id.to_string(), false));
    }
    None
}

/// Match an Origin header value against the allow-list.
fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    let host = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
        .split(':')
        .next()
        .unwrap_or(origin);

    allowed.iter().any(|pattern| {
        if pattern == "*" {
            return true;
        }
        if pattern == origin || pattern == host {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return host.ends_with(&format!(".{}", suffix)) || host == suffix;
        }
        false
    })
}

/// Client address: X-Forwarded-For (first hop), then X-Real-IP, then the
/// socket peer.
fn resolve_client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, peer: IpAddr) -> IpAddr {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(header) = real_ip {
        if let Ok(ip) = header.trim().parse() {
            return ip;
        }
    }
    peer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn control(config: SecurityConfig) -> AdmissionControl {
        AdmissionControl::new(config)
    }

    #[test]
    fn path_parsing_variants() {
        assert_eq!(
            extract_charge_point_id("/ocpp/CP001"),
            Some(("CP001".to_string(), false))
        );
        assert_eq!(
            extract_charge_point_id("/ocpp/1.6/CP001"),
            Some(("CP001".to_string(), true))
        );
        assert_eq!(extract_charge_point_id("/ocpp/"), None);
        assert_eq!(extract_charge_point_id("/other/CP001"), None);
        assert_eq!(extract_charge_point_id("/ocpp/a/b"), None);
    }

    #[test]
    fn subprotocol_required_when_configured() {
        let ctl = control(SecurityConfig::default());
        let err = ctl
            .admit("/ocpp/CP001", None, None, None, None, peer())
            .unwrap_err();
        assert_eq!(err, AdmissionError::MissingSubprotocol);

        let adm = ctl
            .admit("/ocpp/CP001", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap();
        assert_eq!(adm.version, OcppVersion::V201);
        assert_eq!(adm.subprotocol.as_deref(), Some("ocpp2.0.1"));
    }

    #[test]
    fn shortened_token_is_echoed_verbatim() {
        let ctl = control(SecurityConfig::default());
        let adm = ctl
            .admit("/ocpp/CP001", Some("ocpp2.0"), None, None, None, peer())
            .unwrap();
        assert_eq!(adm.version, OcppVersion::V201);
        assert_eq!(adm.subprotocol.as_deref(), Some("ocpp2.0"));
    }

    #[test]
    fn legacy_path_pins_v16() {
        let ctl = control(SecurityConfig::default());
        let adm = ctl
            .admit("/ocpp/1.6/CP001", Some("ocpp1.6"), None, None, None, peer())
            .unwrap();
        assert_eq!(adm.version, OcppVersion::V16);
        assert_eq!(adm.charge_point_id, "CP001");
    }

    #[test]
    fn origin_matrix() {
        let allowed = vec![
            "https://ops.example.com".to_string(),
            "*.fleet.example".to_string(),
        ];
        assert!(origin_allowed(&allowed, "https://ops.example.com"));
        assert!(origin_allowed(&allowed, "https://dash.fleet.example"));
        assert!(origin_allowed(&allowed, "https://deep.sub.fleet.example"));
        assert!(!origin_allowed(&allowed, "https://evil.example.com"));
        // Empty list rejects every browser origin.
        assert!(!origin_allowed(&[], "https://ops.example.com"));
        // Wildcard allows anything.
        assert!(origin_allowed(&["*".to_string()], "https://anything.example"));
    }

    #[test]
    fn absent_origin_is_allowed() {
        let ctl = control(SecurityConfig {
            allowed_origins: vec![],
            ..SecurityConfig::default()
        });
        assert!(ctl
            .admit("/ocpp/CP001", Some("ocpp2.0.1"), None, None, None, peer())
            .is_ok());
    }

    #[test]
    fn missing_id_with_allow_list_is_unauthorized() {
        let ctl = control(SecurityConfig {
            allowed_charge_point_ids: vec!["CP001".to_string()],
            ..SecurityConfig::default()
        });
        let err = ctl
            .admit("/ocpp/", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap_err();
        assert_eq!(err, AdmissionError::Unauthorized);

        // Without an allow-list the same request is just a malformed path.
        let ctl = control(SecurityConfig::default());
        let err = ctl
            .admit("/ocpp/", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap_err();
        assert_eq!(err, AdmissionError::MissingChargePointId);
    }

    #[test]
    fn charge_point_allow_list() {
        let ctl = control(SecurityConfig {
            allowed_charge_point_ids: vec!["CP001".to_string()],
            ..SecurityConfig::default()
        });
        assert!(ctl
            .admit("/ocpp/CP001", Some("ocpp2.0.1"), None, None, None, peer())
            .is_ok());
        let err = ctl
            .admit("/ocpp/CP999", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap_err();
        assert_eq!(err, AdmissionError::ChargePointNotAllowed("CP999".into()));
    }

    #[test]
    fn client_ip_resolution_order() {
        let p = peer();
        assert_eq!(
            resolve_client_ip(Some("203.0.113.7, 10.0.0.1"), Some("203.0.113.9"), p),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_client_ip(None, Some("203.0.113.9"), p),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
        assert_eq!(resolve_client_ip(Some("garbage"), None, p), p);
        assert_eq!(resolve_client_ip(None, None, p), p);
    }

    #[test]
    fn per_ip_cap_and_release() {
        let ctl = control(SecurityConfig {
            max_connections_per_ip: 2,
            ..SecurityConfig::default()
        });

        ctl.admit("/ocpp/CP-A", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap();
        ctl.admit("/ocpp/CP-B", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap();
        let err = ctl
            .admit("/ocpp/CP-C", Some("ocpp2.0.1"), None, None, None, peer())
            .unwrap_err();
        assert_eq!(err, AdmissionError::TooManyConnections(peer()));

        ctl.release(peer());
        assert_eq!(ctl.connections_from(peer()), 1);
        assert!(ctl
            .admit("/ocpp/CP-C", Some("ocpp2.0.1"), None, None, None, peer())
            .is_ok());
    }
}
