//! Authorize handler (1.6).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus as WireStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::services::AuthorizationStatus;
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct AuthorizeHandler {
    context: Arc<HandlerContext>,
}

impl AuthorizeHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for AuthorizeHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: AuthorizeRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid Authorize: {}", e)))?;

        let decision = self
            .context
            .authorization
            .authorize(&req.id_tag)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        info!(
            charge_point_id = session.charge_point_id(),
            id_tag = req.id_tag.as_str(),
            status = decision.status.as_str(),
            "Authorize (1.6)"
        );

        let status = match decision.status {
            AuthorizationStatus::Accepted => WireStatus::Accepted,
            AuthorizationStatus::Blocked => WireStatus::Blocked,
            AuthorizationStatus::Invalid => WireStatus::Invalid,
            AuthorizationStatus::ConcurrentTx => WireStatus::ConcurrentTx,
        };

        let response = AuthorizeResponse {
            id_tag_info: IdTagInfo {
                status,
                expiry_date: None,
                parent_id_tag: None,
            },
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
