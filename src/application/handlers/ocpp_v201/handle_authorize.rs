//! Authorize handler (2.0.1).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::datatypes::id_token_info_type::IdTokenInfoType;
use rust_ocpp::v2_0_1::enumerations::authorization_status_enum_type::AuthorizationStatusEnumType;
use rust_ocpp::v2_0_1::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
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

        let id_token = &req.id_token.id_token;
        let decision = self
            .context
            .authorization
            .authorize(id_token)
            .await
            .map_err(|e| CallFault::internal(e.to_string()))?;

        info!(
            charge_point_id = session.charge_point_id(),
            id_token = id_token.as_str(),
            status = decision.status.as_str(),
            "Authorize"
        );

        let status = match decision.status {
            AuthorizationStatus::Accepted => AuthorizationStatusEnumType::Accepted,
            AuthorizationStatus::Blocked => AuthorizationStatusEnumType::Blocked,
            AuthorizationStatus::Invalid => AuthorizationStatusEnumType::Invalid,
            AuthorizationStatus::ConcurrentTx => AuthorizationStatusEnumType::ConcurrentTx,
        };

        let response = AuthorizeResponse {
            certificate_status: None,
            id_token_info: IdTokenInfoType {
                status,
                cache_expiry_date_time: None,
                charging_priority: None,
                language1: None,
                evse_id: None,
                language2: None,
                group_id_token: None,
                personal_message: None,
            },
        };
        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}
