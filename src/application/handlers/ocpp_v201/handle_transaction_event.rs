//! TransactionEvent handler (2.0.1).
//!
//! `TransactionEvent` replaces the 1.6 StartTransaction / StopTransaction
//! pair; `event_type` selects Started, Updated, or Ended. The handler
//! normalizes the payload and defers lifecycle decisions to the
//! transaction engine.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::datatypes::id_token_info_type::IdTokenInfoType;
use rust_ocpp::v2_0_1::enumerations::authorization_status_enum_type::AuthorizationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::measurand_enum_type::MeasurandEnumType;
use rust_ocpp::v2_0_1::enumerations::transaction_event_enum_type::TransactionEventEnumType;
use rust_ocpp::v2_0_1::messages::transaction_event::{
    TransactionEventRequest, TransactionEventResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::services::{AuthorizationStatus, TxEventData};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct TransactionEventHandler {
    context: Arc<HandlerContext>,
}

impl TransactionEventHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for TransactionEventHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: TransactionEventRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid TransactionEvent: {}", e)))?;

        let evse_id = req.evse.as_ref().map(|e| e.id).unwrap_or(1);
        let id_token = req.id_token.as_ref().map(|t| t.id_token.clone());
        let (energy_wh, power_w, soc) = extract_meter_values(&req);

        info!(
            charge_point_id = session.charge_point_id(),
            event_type = ?req.event_type,
            transaction_id = req.transaction_info.transaction_id.as_str(),
            trigger_reason = ?req.trigger_reason,
            evse_id,
            "TransactionEvent"
        );

        let data = TxEventData {
            ocpp_transaction_id: req.transaction_info.transaction_id.clone(),
            evse_id,
            id_token,
            timestamp: req.timestamp,
            meter_wh: energy_wh,
            power_w,
            soc,
        };

        let status = match req.event_type {
            TransactionEventEnumType::Started => Some(
                self.context
                    .transactions
                    .on_started(session.charge_point_id(), data)
                    .await
                    .map_err(|e| CallFault::internal(e.to_string()))?,
            ),
            TransactionEventEnumType::Updated => {
                self.context
                    .transactions
                    .on_updated(session.charge_point_id(), data)
                    .await
                    .map_err(|e| CallFault::internal(e.to_string()))?;
                None
            }
            TransactionEventEnumType::Ended => Some(
                self.context
                    .transactions
                    .on_ended(session.charge_point_id(), data)
                    .await
                    .map_err(|e| CallFault::internal(e.to_string()))?,
            ),
        };

        Ok(build_response(status))
    }
}

/// Pull energy (Wh), power (W), and SOC (%) out of the sampled values.
fn extract_meter_values(
    req: &TransactionEventRequest,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut energy_wh: Option<f64> = None;
    let mut power_w: Option<f64> = None;
    let mut soc: Option<f64> = None;

    if let Some(meter_values) = &req.meter_value {
        for mv in meter_values {
            for sampled in &mv.sampled_value {
                use rust_decimal::prelude::ToPrimitive;
                let value: f64 = match sampled.value.to_f64() {
                    Some(v) => v,
                    None => continue,
                };

                let measurand = sampled
                    .measurand
                    .clone()
                    .unwrap_or(MeasurandEnumType::EnergyActiveImportRegister);

                match measurand {
                    MeasurandEnumType::EnergyActiveImportRegister => {
                        let is_kwh = sampled
                            .unit_of_measure
                            .as_ref()
                            .and_then(|u| u.unit.as_ref())
                            .map(|u| u.eq_ignore_ascii_case("kWh"))
                            .unwrap_or(false);
                        energy_wh = Some(if is_kwh { value * 1000.0 } else { value });
                    }
                    MeasurandEnumType::PowerActiveImport => {
                        let is_kw = sampled
                            .unit_of_measure
                            .as_ref()
                            .and_then(|u| u.unit.as_ref())
                            .map(|u| u.eq_ignore_ascii_case("kW"))
                            .unwrap_or(false);
                        power_w = Some(if is_kw { value * 1000.0 } else { value });
                    }
                    MeasurandEnumType::SoC => {
                        soc = Some(value);
                    }
                    _ => {}
                }
            }
        }
    }

    (energy_wh, power_w, soc)
}

fn build_response(status: Option<AuthorizationStatus>) -> Value {
    let wire_status = status.map(|s| match s {
        AuthorizationStatus::Accepted => AuthorizationStatusEnumType::Accepted,
        AuthorizationStatus::Blocked => AuthorizationStatusEnumType::Blocked,
        AuthorizationStatus::Invalid => AuthorizationStatusEnumType::Invalid,
        AuthorizationStatus::ConcurrentTx => AuthorizationStatusEnumType::ConcurrentTx,
    });

    let response = TransactionEventResponse {
        total_cost: None,
        charging_priority: None,
        id_token_info: wire_status.map(|status| IdTokenInfoType {
            status,
            cache_expiry_date_time: None,
            charging_priority: None,
            language1: None,
            evse_id: None,
            language2: None,
            group_id_token: None,
            personal_message: None,
        }),
        updated_personal_message: None,
    };

    serde_json::to_value(&response).unwrap_or_default()
}
