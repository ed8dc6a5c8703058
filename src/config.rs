//! Application configuration (TOML-based).
//!
//! Loaded from `CSMS_CONFIG` or the platform config dir
//! (`~/.config/gridlink-csms/config.toml`); every section falls back to
//! defaults so the server runs with no file at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::application::services::pricing::PricingConfig;
use crate::application::services::V2gConfig;
use crate::application::session::SessionConfig;
use crate::infrastructure::tls::TlsSettings;
use crate::interfaces::ws::SecurityConfig;

/// Default path of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gridlink-csms")
        .join("config.toml")
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub ocpp: OcppSection,
    pub security: SecuritySection,
    pub tls: TlsSection,
    pub pricing: PricingSection,
    pub v2g: V2gSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_s: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            shutdown_timeout_s: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcppSection {
    /// Heartbeat interval advertised to stations at boot, seconds.
    pub heartbeat_interval_s: u64,
    /// Default Command API deadline, seconds.
    pub call_timeout_s: u64,
    /// Bound on queued operator Calls per session.
    pub outbound_queue: usize,
    /// Watchdog sweep cadence, seconds.
    pub heartbeat_check_interval_s: u64,
}

impl Default for OcppSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 300,
            call_timeout_s: 30,
            outbound_queue: 64,
            heartbeat_check_interval_s: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub allowed_origins: Vec<String>,
    pub allowed_charge_point_ids: Vec<String>,
    pub require_subprotocol: bool,
    pub max_connections_per_ip: usize,
    pub reconnect_debounce_s: i64,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_charge_point_ids: Vec::new(),
            require_subprotocol: true,
            max_connections_per_ip: 10,
            reconnect_debounce_s: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsSection {
    pub enabled: bool,
    pub cert: String,
    pub key: String,
    pub client_ca: Option<String>,
    pub require_client_cert: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingSection {
    pub base: f64,
    pub peak_multiplier: f64,
    /// Peak window start hour (inclusive).
    pub peak_start: u32,
    /// Peak window end hour (exclusive).
    pub peak_end: u32,
    pub idle_fee_per_min: f64,
    pub idle_grace_min: i64,
    pub currency: String,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            base: 0.75,
            peak_multiplier: 1.5,
            peak_start: 18,
            peak_end: 21,
            idle_fee_per_min: 0.05,
            idle_grace_min: 15,
            currency: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct V2gSection {
    pub site_power_kw: f64,
    pub min_soc: f64,
    pub operator_margin: f64,
    pub max_discharge_kwh: f64,
    pub price_poll_interval_s: u64,
    pub rebalance_interval_s: u64,
}

impl Default for V2gSection {
    fn default() -> Self {
        Self {
            site_power_kw: 100.0,
            min_soc: 40.0,
            operator_margin: 0.1,
            max_discharge_kwh: 50.0,
            price_poll_interval_s: 900,
            rebalance_interval_s: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    /// Port the Prometheus scrape endpoint listens on.
    pub port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9100,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read {}: {}", path.display(), e))?;
        toml::from_str(&raw).map_err(|e| format!("parse {}: {}", path.display(), e))
    }

    // ── Derived sub-configs ────────────────────────────────

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            call_queue_capacity: self.ocpp.outbound_queue,
            call_timeout: Duration::from_secs(self.ocpp.call_timeout_s),
            heartbeat_interval_s: self.ocpp.heartbeat_interval_s,
        }
    }

    pub fn security_config(&self) -> SecurityConfig {
        SecurityConfig {
            allowed_origins: self.security.allowed_origins.clone(),
            allowed_charge_point_ids: self.security.allowed_charge_point_ids.clone(),
            require_subprotocol: self.security.require_subprotocol,
            max_connections_per_ip: self.security.max_connections_per_ip,
        }
    }

    pub fn pricing_config(&self) -> PricingConfig {
        PricingConfig {
            base_rate: self.pricing.base,
            peak_multiplier: self.pricing.peak_multiplier,
            peak_start_hour: self.pricing.peak_start,
            peak_end_hour: self.pricing.peak_end,
            idle_fee_per_min: self.pricing.idle_fee_per_min,
            idle_grace_min: self.pricing.idle_grace_min,
            currency: self.pricing.currency.clone(),
        }
    }

    pub fn v2g_config(&self) -> V2gConfig {
        V2gConfig {
            site_power_kw: self.v2g.site_power_kw,
            min_soc: self.v2g.min_soc,
            operator_margin: self.v2g.operator_margin,
            max_discharge_kwh: self.v2g.max_discharge_kwh,
            price_poll_interval_s: self.v2g.price_poll_interval_s,
        }
    }

    pub fn tls_settings(&self) -> Option<TlsSettings> {
        if !self.tls.enabled {
            return None;
        }
        Some(TlsSettings {
            cert: self.tls.cert.clone(),
            key: self.tls.key.clone(),
            client_ca: self.tls.client_ca.clone(),
            require_client_cert: self.tls.require_client_cert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ocpp.heartbeat_interval_s, 300);
        assert_eq!(config.ocpp.call_timeout_s, 30);
        assert!(config.security.require_subprotocol);
        assert!(!config.tls.enabled);
        assert_eq!(config.pricing.peak_start, 18);
        assert_eq!(config.v2g.min_soc, 40.0);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let toml = r#"
            [server]
            port = 9443

            [pricing]
            base = 0.5
            currency = "BRL"

            [security]
            allowed_charge_point_ids = ["CP001", "CP002"]
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pricing.base, 0.5);
        assert_eq!(config.pricing.currency, "BRL");
        assert_eq!(config.pricing.peak_multiplier, 1.5);
        assert_eq!(config.security.allowed_charge_point_ids.len(), 2);
        assert!(config.security.allowed_origins.is_empty());
    }
}
