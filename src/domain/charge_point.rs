//! ChargePoint and connector domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational status of a charge point or a single connector.
///
/// This is the 2.0.1 `ConnectorStatus` set and is carried verbatim on the
/// wire; 1.6 status strings are folded into it via [`ConnectorStatus::from_v16`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    /// Fixed mapping from OCPP 1.6 status strings.
    ///
    /// Available→Available; Occupied|Charging|SuspendedEV|SuspendedEVSE
    /// (and the plug-engaged 1.6-only states Preparing|Finishing)→Occupied;
    /// Faulted→Faulted; Unavailable|Reserved→Unavailable. Anything else is
    /// treated as Unavailable.
    pub fn from_v16(status: &str) -> Self {
        match status {
            "Available" => Self::Available,
            "Occupied" | "Charging" | "SuspendedEV" | "SuspendedEVSE" | "Preparing"
            | "Finishing" => Self::Occupied,
            "Faulted" => Self::Faulted,
            _ => Self::Unavailable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        }
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single charging connector within an EVSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub evse_id: i32,
    pub connector_id: i32,
    pub status: ConnectorStatus,
    /// Rated maximum charge power in W.
    pub max_power_w: f64,
    /// Most recent instantaneous power sample in W.
    pub power_w: f64,
    /// Most recent meter reading in Wh.
    pub meter_wh: f64,
    pub updated_at: DateTime<Utc>,
}

impl Connector {
    pub fn new(evse_id: i32, connector_id: i32, max_power_w: f64) -> Self {
        Self {
            evse_id,
            connector_id,
            status: ConnectorStatus::Available,
            max_power_w,
            power_w: 0.0,
            meter_wh: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// A charging station known to the central system.
///
/// Created on first successful boot and never destroyed; a disconnected
/// station is only marked unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePoint {
    pub id: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub status: ConnectorStatus,
    pub connectors: Vec<Connector>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChargePoint {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            vendor: None,
            model: None,
            serial_number: None,
            firmware_version: None,
            status: ConnectorStatus::Available,
            connectors: Vec::new(),
            last_heartbeat: None,
            latitude: None,
            longitude: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn connector_mut(&mut self, evse_id: i32) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.evse_id == evse_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v16_status_mapping_table() {
        assert_eq!(ConnectorStatus::from_v16("Available"), ConnectorStatus::Available);
        for s in ["Occupied", "Charging", "SuspendedEV", "SuspendedEVSE", "Preparing", "Finishing"] {
            assert_eq!(ConnectorStatus::from_v16(s), ConnectorStatus::Occupied, "{s}");
        }
        assert_eq!(ConnectorStatus::from_v16("Faulted"), ConnectorStatus::Faulted);
        assert_eq!(ConnectorStatus::from_v16("Unavailable"), ConnectorStatus::Unavailable);
        assert_eq!(ConnectorStatus::from_v16("Reserved"), ConnectorStatus::Unavailable);
    }

    #[test]
    fn status_serializes_verbatim() {
        let json = serde_json::to_string(&ConnectorStatus::Occupied).unwrap();
        assert_eq!(json, r#""Occupied""#);
    }
}
