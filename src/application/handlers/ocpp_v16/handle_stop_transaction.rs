//! StopTransaction handler (1.6).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus as WireStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::services::TxEventData;
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct StopTransactionHandler {
    context: Arc<HandlerContext>,
}

impl StopTransactionHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for StopTransactionHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: StopTransactionRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid StopTransaction: {}", e)))?;

        info!(
            charge_point_id = session.charge_point_id(),
            transaction_id = req.transaction_id,
            meter_stop = req.meter_stop,
            reason = ?req.reason,
            "StopTransaction (1.6)"
        );

        // 1.6 carries no EVSE on stop; the engine locates the transaction
        // by its wire id (or falls back via the id tag).
        self.context
            .transactions
            .on_ended(
                session.charge_point_id(),
                TxEventData {
                    ocpp_transaction_id: req.transaction_id.to_string(),
                    evse_id: 0,
                    id_token: req.id_tag.clone(),
                    timestamp: req.timestamp,
                    meter_wh: Some(req.meter_stop as f64),
                    power_w: None,
                    soc: None,
                },
            )
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        let response = StopTransactionResponse {
            id_tag_info: Some(IdTagInfo {
                status: WireStatus::Accepted,
                expiry_date: None,
                parent_id_tag: None,
            }),
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
