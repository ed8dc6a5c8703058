//! UpdateFirmware command.

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::datatypes::firmware_type::FirmwareType;
use rust_ocpp::v2_0_1::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

pub async fn update_firmware(
    commands: &SharedCommandService,
    charge_point_id: &str,
    location: &str,
    retrieve_date: DateTime<Utc>,
    request_id: i32,
    retries: Option<i32>,
    retry_interval: Option<i32>,
) -> CoreResult<String> {
    info!(
        charge_point_id,
        location,
        request_id,
        %retrieve_date,
        "UpdateFirmware"
    );

    let request = UpdateFirmwareRequest {
        retries,
        retry_interval,
        request_id,
        firmware: FirmwareType {
            location: location.to_string(),
            retrieve_date_time: retrieve_date,
            install_date_time: None,
            signing_certificate: None,
            signature: None,
        },
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "UpdateFirmware", payload)
        .await?;

    let response: UpdateFirmwareResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad UpdateFirmware response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
