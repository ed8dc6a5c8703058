//! ChangeAvailability command.

use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::enumerations::operational_status_enum_type::OperationalStatusEnumType;
use rust_ocpp::v2_0_1::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

/// Requested operational state.
#[derive(Debug, Clone, Copy)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// Change availability of an EVSE, or of the whole station when `evse_id`
/// is 0.
pub async fn change_availability(
    commands: &SharedCommandService,
    charge_point_id: &str,
    evse_id: i32,
    connector_id: Option<i32>,
    availability: Availability,
) -> CoreResult<String> {
    info!(
        charge_point_id,
        evse_id,
        ?connector_id,
        ?availability,
        "ChangeAvailability"
    );

    let operational_status = match availability {
        Availability::Operative => OperationalStatusEnumType::Operative,
        Availability::Inoperative => OperationalStatusEnumType::Inoperative,
    };

    let evse = if evse_id > 0 {
        Some(EVSEType {
            id: evse_id,
            connector_id,
        })
    } else {
        None
    };

    let request = ChangeAvailabilityRequest {
        operational_status,
        evse,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "ChangeAvailability", payload)
        .await?;

    let response: ChangeAvailabilityResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad ChangeAvailability response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
