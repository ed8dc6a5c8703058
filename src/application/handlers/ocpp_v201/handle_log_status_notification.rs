//! LogStatusNotification handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStatusNotificationRequest {
    status: String,
    #[serde(default)]
    request_id: Option<i32>,
}

pub struct LogStatusNotificationHandler {
    _context: Arc<HandlerContext>,
}

impl LogStatusNotificationHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { _context: context }
    }
}

#[async_trait]
impl ActionHandler for LogStatusNotificationHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: LogStatusNotificationRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid LogStatusNotification: {}", e)))?;

        info!(
            charge_point_id = session.charge_point_id(),
            status = req.status.as_str(),
            request_id = ?req.request_id,
            "LogStatusNotification"
        );
        metrics::counter!("ocpp_log_status_total", "status" => req.status).increment(1);

        Ok(serde_json::json!({}))
    }
}
