//! UnlockConnector command.

use rust_ocpp::v2_0_1::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

pub async fn unlock_connector(
    commands: &SharedCommandService,
    charge_point_id: &str,
    evse_id: i32,
    connector_id: i32,
) -> CoreResult<String> {
    info!(charge_point_id, evse_id, connector_id, "UnlockConnector");

    let request = UnlockConnectorRequest {
        evse_id,
        connector_id,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "UnlockConnector", payload)
        .await?;

    let response: UnlockConnectorResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad UnlockConnector response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
