//! RequestStopTransaction command.

use rust_ocpp::v2_0_1::messages::request_stop_transaction::{
    RequestStopTransactionRequest, RequestStopTransactionResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

pub async fn request_stop_transaction(
    commands: &SharedCommandService,
    charge_point_id: &str,
    transaction_id: &str,
) -> CoreResult<String> {
    info!(charge_point_id, transaction_id, "RequestStopTransaction");

    let request = RequestStopTransactionRequest {
        transaction_id: transaction_id.to_string(),
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "RequestStopTransaction", payload)
        .await?;

    let response: RequestStopTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad RequestStopTransaction response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
