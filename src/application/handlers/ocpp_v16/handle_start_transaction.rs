//! StartTransaction handler (1.6).
//!
//! The central system assigns the numeric transaction id; it doubles as
//! the wire transaction id on the shared transaction model.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus as WireStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::services::{AuthorizationStatus, TxEventData};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct StartTransactionHandler {
    context: Arc<HandlerContext>,
}

impl StartTransactionHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

fn wire_status(status: AuthorizationStatus) -> WireStatus {
    match status {
        AuthorizationStatus::Accepted => WireStatus::Accepted,
        AuthorizationStatus::Blocked => WireStatus::Blocked,
        AuthorizationStatus::Invalid => WireStatus::Invalid,
        AuthorizationStatus::ConcurrentTx => WireStatus::ConcurrentTx,
    }
}

#[async_trait]
impl ActionHandler for StartTransactionHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: StartTransactionRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid StartTransaction: {}", e)))?;

        let transaction_id = super::next_transaction_id();
        info!(
            charge_point_id = session.charge_point_id(),
            connector_id = req.connector_id,
            id_tag = req.id_tag.as_str(),
            meter_start = req.meter_start,
            transaction_id,
            "StartTransaction (1.6)"
        );

        let status = self
            .context
            .transactions
            .on_started(
                session.charge_point_id(),
                TxEventData {
                    ocpp_transaction_id: transaction_id.to_string(),
                    evse_id: req.connector_id as i32,
                    id_token: Some(req.id_tag.clone()),
                    timestamp: req.timestamp,
                    meter_wh: Some(req.meter_start as f64),
                    power_w: None,
                    soc: None,
                },
            )
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        let response = StartTransactionResponse {
            transaction_id: if status.is_accepted() { transaction_id } else { 0 },
            id_tag_info: IdTagInfo {
                status: wire_status(status),
                expiry_date: None,
                parent_id_tag: None,
            },
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
