//! BootNotification handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
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
        // Some stations omit the mandatory `reason` field; inject a default
        // before binding rather than rejecting the boot.
        let mut patched = payload;
        if let Some(obj) = patched.as_object_mut() {
            obj.entry("reason").or_insert(serde_json::json!("PowerUp"));
        }

        let req: BootNotificationRequest = serde_json::from_value(patched)
            .map_err(|e| CallFault::formation(format!("invalid BootNotification: {}", e)))?;

        let station = &req.charging_station;
        info!(
            charge_point_id = session.charge_point_id(),
            vendor = station.vendor_name.as_str(),
            model = station.model.as_str(),
            reason = ?req.reason,
            "BootNotification"
        );

        self.context
            .charge_points
            .register_or_update(
                session.charge_point_id(),
                &station.vendor_name,
                &station.model,
                station.serial_number.as_deref(),
                station.firmware_version.as_deref(),
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
            interval: interval as u16,
            status: RegistrationStatusEnumType::Accepted,
            status_info: None,
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
