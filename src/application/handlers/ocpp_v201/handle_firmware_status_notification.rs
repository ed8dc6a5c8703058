//! FirmwareStatusNotification handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct FirmwareStatusNotificationHandler {
    context: Arc<HandlerContext>,
}

impl FirmwareStatusNotificationHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for FirmwareStatusNotificationHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: FirmwareStatusNotificationRequest = serde_json::from_value(payload)
            .map_err(|e| {
                CallFault::formation(format!("invalid FirmwareStatusNotification: {}", e))
            })?;

        info!(
            charge_point_id = session.charge_point_id(),
            status = ?req.status,
            request_id = ?req.request_id,
            "FirmwareStatusNotification"
        );

        self.context
            .firmware
            .on_status(
                session.charge_point_id(),
                &format!("{:?}", req.status),
                req.request_id,
            )
            .await;

        serde_json::to_value(&FirmwareStatusNotificationResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
