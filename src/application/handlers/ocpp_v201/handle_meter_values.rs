//! MeterValues handler (2.0.1).
//!
//! MeterValues carries no transaction id; the engine attaches the sample
//! to the active transaction on the reporting EVSE, if any.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::enumerations::measurand_enum_type::MeasurandEnumType;
use rust_ocpp::v2_0_1::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct MeterValuesHandler {
    context: Arc<HandlerContext>,
}

impl MeterValuesHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for MeterValuesHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: MeterValuesRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid MeterValues: {}", e)))?;

        let mut energy_wh: Option<f64> = None;
        let mut power_w: Option<f64> = None;
        let mut soc: Option<f64> = None;

        for meter_value in &req.meter_value {
            for sampled in &meter_value.sampled_value {
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

        info!(
            charge_point_id = session.charge_point_id(),
            evse_id = req.evse_id,
            samples = req.meter_value.len(),
            ?energy_wh,
            ?power_w,
            ?soc,
            "MeterValues"
        );

        self.context
            .transactions
            .on_meter_sample(session.charge_point_id(), req.evse_id, energy_wh, power_w, soc)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        serde_json::to_value(&MeterValuesResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
