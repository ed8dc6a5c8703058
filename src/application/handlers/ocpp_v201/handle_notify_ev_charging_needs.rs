//! NotifyEVChargingNeeds handler (2.0.1 with bidirectional extensions).
//!
//! The payload binds a local shape rather than the stock 2.0.1 schema:
//! the bidirectional transfer modes (`AC_BPT`, `DC_BPT`) and the discharge
//! parameters the V2G engine needs are 2.x extensions the base schema
//! cannot carry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::{CallFault, EnergyTransferMode, V2gCapability};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyEvChargingNeedsRequest {
    evse_id: i32,
    charging_needs: ChargingNeeds,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargingNeeds {
    requested_energy_transfer: EnergyTransferMode,
    #[serde(default)]
    departure_time: Option<DateTime<Utc>>,
    #[serde(default)]
    v2x_charging_parameters: Option<V2xChargingParameters>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2xChargingParameters {
    #[serde(default)]
    max_discharge_power: Option<f64>,
    #[serde(default)]
    max_discharge_current: Option<f64>,
    #[serde(default)]
    state_of_charge: Option<f64>,
    #[serde(default)]
    battery_capacity: Option<f64>,
}

pub struct NotifyEvChargingNeedsHandler {
    context: Arc<HandlerContext>,
}

impl NotifyEvChargingNeedsHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for NotifyEvChargingNeedsHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: NotifyEvChargingNeedsRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid NotifyEVChargingNeeds: {}", e)))?;

        info!(
            charge_point_id = session.charge_point_id(),
            evse_id = req.evse_id,
            transfer = ?req.charging_needs.requested_energy_transfer,
            "NotifyEVChargingNeeds"
        );

        let v2x = req.charging_needs.v2x_charging_parameters;
        self.context.v2g.record_charging_needs(V2gCapability {
            charge_point_id: session.charge_point_id().to_string(),
            evse_id: req.evse_id,
            requested_energy_transfer: req.charging_needs.requested_energy_transfer,
            max_discharge_power_w: v2x.as_ref().and_then(|p| p.max_discharge_power),
            max_discharge_current_a: v2x.as_ref().and_then(|p| p.max_discharge_current),
            state_of_charge: v2x.as_ref().and_then(|p| p.state_of_charge),
            battery_capacity_kwh: v2x.as_ref().and_then(|p| p.battery_capacity),
            departure_time: req.charging_needs.departure_time,
            updated_at: Utc::now(),
        });

        Ok(serde_json::json!({ "status": "Accepted" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_bpt_payload() {
        let payload = serde_json::json!({
            "evseId": 1,
            "chargingNeeds": {
                "requestedEnergyTransfer": "DC_BPT",
                "departureTime": "2025-06-15T18:00:00Z",
                "v2xChargingParameters": {
                    "maxDischargePower": 11000.0,
                    "maxDischargeCurrent": 32.0,
                    "stateOfCharge": 80.0,
                    "batteryCapacity": 60.0
                }
            }
        });
        let req: NotifyEvChargingNeedsRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(
            req.charging_needs.requested_energy_transfer,
            EnergyTransferMode::DcBpt
        );
        let v2x = req.charging_needs.v2x_charging_parameters.unwrap();
        assert_eq!(v2x.state_of_charge, Some(80.0));
        assert_eq!(v2x.battery_capacity, Some(60.0));
    }
}
