//! Reset command.

use rust_ocpp::v2_0_1::enumerations::reset_enum_type::ResetEnumType;
use rust_ocpp::v2_0_1::messages::reset::{ResetRequest, ResetResponse};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

/// Reset flavor requested by the operator.
#[derive(Debug, Clone, Copy)]
pub enum ResetKind {
    /// Reset as soon as possible, interrupting any transaction.
    Immediate,
    /// Reset once the station is idle.
    OnIdle,
}

pub async fn reset(
    commands: &SharedCommandService,
    charge_point_id: &str,
    kind: ResetKind,
    evse_id: Option<i32>,
) -> CoreResult<String> {
    info!(charge_point_id, ?kind, ?evse_id, "Reset");

    let request_type = match kind {
        ResetKind::Immediate => ResetEnumType::Immediate,
        ResetKind::OnIdle => ResetEnumType::OnIdle,
    };

    let request = ResetRequest {
        request_type,
        evse_id,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands.send(charge_point_id, "Reset", payload).await?;

    let response: ResetResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad Reset response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
