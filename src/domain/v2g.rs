//! Vehicle-to-grid (bidirectional power transfer) domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Energy transfer mode requested by the EV in NotifyEVChargingNeeds.
///
/// The `_BPT` modes declare bidirectional capability; only those (with
/// sufficient state of charge) qualify a connector for discharge profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyTransferMode {
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "DC")]
    Dc,
    #[serde(rename = "AC_BPT")]
    AcBpt,
    #[serde(rename = "DC_BPT")]
    DcBpt,
}

impl EnergyTransferMode {
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, Self::AcBpt | Self::DcBpt)
    }
}

/// Bidirectional capability of one (charge point, EVSE) pair, refreshed on
/// every NotifyEVChargingNeeds and cleared on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2gCapability {
    pub charge_point_id: String,
    pub evse_id: i32,
    pub requested_energy_transfer: EnergyTransferMode,
    /// Maximum power the EV can export, W.
    pub max_discharge_power_w: Option<f64>,
    /// Maximum current the EV can export, A.
    pub max_discharge_current_a: Option<f64>,
    /// Current state of charge, percent.
    pub state_of_charge: Option<f64>,
    pub battery_capacity_kwh: Option<f64>,
    pub departure_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of power flow in an active V2G session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerDirection {
    Charging,
    Discharging,
}

/// An active discharge (or monitored charge) session. At most one per
/// (charge point, EVSE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2gSession {
    pub id: Uuid,
    pub charge_point_id: String,
    pub evse_id: i32,
    pub direction: PowerDirection,
    pub target_power_kw: f64,
    pub power_kw: f64,
    pub energy_kwh: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl V2gSession {
    pub fn start(
        charge_point_id: impl Into<String>,
        evse_id: i32,
        direction: PowerDirection,
        target_power_kw: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            charge_point_id: charge_point_id.into(),
            evse_id,
            direction,
            target_power_kw,
            power_kw: 0.0,
            energy_kwh: 0.0,
            started_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpt_modes_wire_names() {
        assert_eq!(serde_json::to_string(&EnergyTransferMode::AcBpt).unwrap(), r#""AC_BPT""#);
        assert_eq!(serde_json::to_string(&EnergyTransferMode::DcBpt).unwrap(), r#""DC_BPT""#);
        let parsed: EnergyTransferMode = serde_json::from_str(r#""DC""#).unwrap();
        assert!(!parsed.is_bidirectional());
        assert!(EnergyTransferMode::AcBpt.is_bidirectional());
    }
}
