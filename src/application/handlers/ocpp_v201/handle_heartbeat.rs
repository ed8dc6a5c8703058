//! Heartbeat handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v2_0_1::messages::heartbeat::HeartbeatResponse;
use serde_json::Value;
use tracing::debug;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct HeartbeatHandler {
    context: Arc<HandlerContext>,
}

impl HeartbeatHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for HeartbeatHandler {
    async fn handle(&self, session: &Session, _payload: Value) -> Result<Value, CallFault> {
        debug!(charge_point_id = session.charge_point_id(), "Heartbeat");

        self.context
            .charge_points
            .heartbeat(session.charge_point_id())
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        let response = HeartbeatResponse {
            current_time: Utc::now(),
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
