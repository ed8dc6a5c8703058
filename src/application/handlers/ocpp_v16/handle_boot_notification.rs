//! BootNotification handler (1.6).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct BootNotificationHandler {
    context: Arc<HandlerContext>,
}

impl BootNotificationHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for BootNotificationHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: BootNotificationRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid BootNotification: {}", e)))?;

        info!(
            charge_point_id = session.charge_point_id(),
            vendor = req.charge_point_vendor.as_str(),
            model = req.charge_point_model.as_str(),
            "BootNotification (1.6)"
        );

        self.context
            .charge_points
            .register_or_update(
                session.charge_point_id(),
                &req.charge_point_vendor,
                &req.charge_point_model,
                req.charge_point_serial_number.as_deref(),
                req.firmware_version.as_deref(),
            )
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        self.context
            .charge_points
            .ensure_connectors(session.charge_point_id(), 1)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        let interval = self.context.heartbeat_interval_s;
        session.set_heartbeat_interval(interval);

        let response = BootNotificationResponse {
            current_time: Utc::now(),
            interval: interval as u32,
            status: RegistrationStatus::Accepted,
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
