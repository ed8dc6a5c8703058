//! GetChargingProfiles command.

use rust_ocpp::v2_0_1::datatypes::charging_profile_criterion_type::ChargingProfileCriterionType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::messages::get_charging_profiles::{
    GetChargingProfilesRequest, GetChargingProfilesResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult, ProfilePurpose};

use super::SharedCommandService;

/// Criteria selecting which profiles the charger should report.
#[derive(Debug, Clone, Default)]
pub struct GetChargingProfilesCriteria {
    pub evse_id: Option<i32>,
    pub purpose: Option<ProfilePurpose>,
    pub stack_level: Option<i32>,
    pub profile_ids: Option<Vec<i32>>,
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

/// Ask a station to report its installed profiles (the report arrives as
/// ReportChargingProfiles Calls referencing `request_id`).
pub async fn get_charging_profiles(
    commands: &SharedCommandService,
    charge_point_id: &str,
    request_id: i32,
    criteria: GetChargingProfilesCriteria,
) -> CoreResult<String> {
    info!(
        charge_point_id,
        request_id,
        evse_id = ?criteria.evse_id,
        purpose = ?criteria.purpose,
        "GetChargingProfiles"
    );

    let charging_profile = ChargingProfileCriterionType {
        charging_profile_purpose: criteria.purpose.map(wire_purpose),
        stack_level: criteria.stack_level,
        charging_profile_id: criteria.profile_ids,
        charging_limit_source: None,
    };

    let request = GetChargingProfilesRequest {
        request_id,
        evse_id: criteria.evse_id,
        charging_profile,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "GetChargingProfiles", payload)
        .await?;

    let response: GetChargingProfilesResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad GetChargingProfiles response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
