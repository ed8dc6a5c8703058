//! StatusNotification handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use rust_ocpp::v2_0_1::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::{CallFault, ConnectorStatus};

pub struct StatusNotificationHandler {
    context: Arc<HandlerContext>,
}

impl StatusNotificationHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for StatusNotificationHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: StatusNotificationRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid StatusNotification: {}", e)))?;

        info!(
            charge_point_id = session.charge_point_id(),
            evse_id = req.evse_id,
            connector_id = req.connector_id,
            status = ?req.connector_status,
            "StatusNotification"
        );

        let status = match req.connector_status {
            ConnectorStatusEnumType::Available => ConnectorStatus::Available,
            ConnectorStatusEnumType::Occupied => ConnectorStatus::Occupied,
            ConnectorStatusEnumType::Reserved => ConnectorStatus::Reserved,
            ConnectorStatusEnumType::Unavailable => ConnectorStatus::Unavailable,
            ConnectorStatusEnumType::Faulted => ConnectorStatus::Faulted,
        };

        self.context
            .charge_points
            .update_connector_status(session.charge_point_id(), req.evse_id, status)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        serde_json::to_value(&StatusNotificationResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
