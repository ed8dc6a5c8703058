//! ClearChargingProfile command.

use rust_ocpp::v2_0_1::datatypes::clear_charging_profile_type::ClearChargingProfileType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult, ProfilePurpose};

use super::SharedCommandService;

/// Criteria selecting which profiles to clear.
#[derive(Debug, Clone, Default)]
pub struct ClearChargingProfileCriteria {
    /// Clear a specific profile by its id.
    pub charging_profile_id: Option<i32>,
    /// Restrict to profiles on this EVSE (0 = entire station).
    pub evse_id: Option<i32>,
    /// Restrict to profiles with this purpose.
    pub purpose: Option<ProfilePurpose>,
    /// Restrict to profiles at this stack level.
    pub stack_level: Option<i32>,
}

fn wire_purpose(purpose: ProfilePurpose) -> ChargingProfilePurposeEnumType {
    match purpose {
        ProfilePurpose::ChargePointMaxProfile => {
            ChargingProfilePurposeEnumType::ChargingStationMaxProfile
        }
        ProfilePurpose::TxDefaultProfile => ChargingProfilePurposeEnumType::TxDefaultProfile,
        ProfilePurpose::TxProfile => ChargingProfilePurposeEnumType::TxProfile,
    }
}

/// Clear charging profiles. A charger with no matching profile answers
/// `Unknown`; that is a valid outcome, not an error.
pub async fn clear_charging_profile(
    commands: &SharedCommandService,
    charge_point_id: &str,
    criteria: ClearChargingProfileCriteria,
) -> CoreResult<String> {
    info!(charge_point_id, ?criteria, "ClearChargingProfile");

    let charging_profile_criteria = if criteria.evse_id.is_some()
        || criteria.purpose.is_some()
        || criteria.stack_level.is_some()
    {
        Some(ClearChargingProfileType {
            evse_id: criteria.evse_id,
            charging_profile_purpose: criteria.purpose.map(wire_purpose),
            stack_level: criteria.stack_level,
        })
    } else {
        None
    };

    let request = ClearChargingProfileRequest {
        charging_profile_id: criteria.charging_profile_id,
        charging_profile_criteria,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "ClearChargingProfile", payload)
        .await?;

    let response: ClearChargingProfileResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad ClearChargingProfile response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
