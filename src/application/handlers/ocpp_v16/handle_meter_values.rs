//! MeterValues handler (1.6). Sampled values arrive as strings.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Measurand, UnitOfMeasure};
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
                let value: f64 = match sampled.value.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                let measurand = sampled
                    .measurand
                    .clone()
                    .unwrap_or(Measurand::EnergyActiveImportRegister);

                match measurand {
                    Measurand::EnergyActiveImportRegister => {
                        let wh = match sampled.unit.as_ref() {
                            Some(UnitOfMeasure::KWh) => value * 1000.0,
                            _ => value,
                        };
                        energy_wh = Some(wh);
                    }
                    Measurand::PowerActiveImport => {
                        let w = match sampled.unit.as_ref() {
                            Some(UnitOfMeasure::Kw) => value * 1000.0,
                            _ => value,
                        };
                        power_w = Some(w);
                    }
                    Measurand::SoC => {
                        soc = Some(value);
                    }
                    _ => {}
                }
            }
        }

        info!(
            charge_point_id = session.charge_point_id(),
            connector_id = req.connector_id,
            transaction_id = ?req.transaction_id,
            ?energy_wh,
            ?power_w,
            ?soc,
            "MeterValues (1.6)"
        );

        self.context
            .transactions
            .on_meter_sample(
                session.charge_point_id(),
                req.connector_id as i32,
                energy_wh,
                power_w,
                soc,
            )
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        serde_json::to_value(&MeterValuesResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
