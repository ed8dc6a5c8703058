//! SetChargingProfile command.

use rust_ocpp::v2_0_1::messages::set_charging_profile::SetChargingProfileResponse;
use tracing::info;

use crate::domain::{ChargingProfile, CoreError, CoreResult};

use super::SharedCommandService;

/// Install a charging profile on a station. `evse_id` 0 addresses the
/// whole station. The profile serializes straight to its wire shape,
/// including negative (discharge) limits.
pub async fn set_charging_profile(
    commands: &SharedCommandService,
    charge_point_id: &str,
    evse_id: i32,
    profile: &ChargingProfile,
) -> CoreResult<String> {
    info!(
        charge_point_id,
        evse_id,
        profile_id = profile.id,
        discharge = profile.is_discharge(),
        "SetChargingProfile"
    );

    let payload = serde_json::json!({
        "evseId": evse_id,
        "chargingProfile": profile,
    });

    let result = commands
        .send(charge_point_id, "SetChargingProfile", payload)
        .await?;

    let response: SetChargingProfileResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad SetChargingProfile response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
