//! StatusNotification handler (1.6).
//!
//! 1.6 has a wider status vocabulary than 2.0.1; the fixed mapping in
//! `ConnectorStatus::from_v16` folds it onto the internal set.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::status_notification::{
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

        let status = ConnectorStatus::from_v16(&format!("{:?}", req.status));
        info!(
            charge_point_id = session.charge_point_id(),
            connector_id = req.connector_id,
            wire_status = ?req.status,
            mapped_status = %status,
            error_code = ?req.error_code,
            "StatusNotification (1.6)"
        );

        self.context
            .charge_points
            .update_connector_status(session.charge_point_id(), req.connector_id as i32, status)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        serde_json::to_value(&StatusNotificationResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
