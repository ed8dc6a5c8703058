//! RequestStartTransaction command.

use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::enumerations::id_token_enum_type::IdTokenEnumType;
use rust_ocpp::v2_0_1::messages::request_start_transaction::{
    RequestStartTransactionRequest, RequestStartTransactionResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

/// Typed result of a remote start.
#[derive(Debug, Clone)]
pub struct RemoteStartOutcome {
    /// `Accepted` or `Rejected` as reported by the charger.
    pub status: String,
    /// The transaction id the charger intends to use, when provided.
    pub transaction_id: Option<String>,
}

pub async fn request_start_transaction(
    commands: &SharedCommandService,
    charge_point_id: &str,
    id_token: &str,
    evse_id: Option<i32>,
    remote_start_id: i32,
) -> CoreResult<RemoteStartOutcome> {
    info!(charge_point_id, id_token, ?evse_id, "RequestStartTransaction");

    let request = RequestStartTransactionRequest {
        evse_id,
        remote_start_id,
        id_token: IdTokenType {
            id_token: id_token.to_string(),
            kind: IdTokenEnumType::Central,
            additional_info: None,
        },
        charging_profile: None,
        group_id_token: None,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "RequestStartTransaction", payload)
        .await?;

    let response: RequestStartTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad RequestStartTransaction response: {}", e)))?;

    Ok(RemoteStartOutcome {
        status: format!("{:?}", response.status),
        transaction_id: response.transaction_id,
    })
}
