//! GetLog command.

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::datatypes::log_parameters_type::LogParametersType;
use rust_ocpp::v2_0_1::enumerations::log_enum_type::LogEnumType;
use rust_ocpp::v2_0_1::messages::get_log::{GetLogRequest, GetLogResponse};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

/// Result of a GetLog command.
#[derive(Debug, Clone)]
pub struct GetLogResult {
    pub status: String,
    pub filename: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub async fn get_log(
    commands: &SharedCommandService,
    charge_point_id: &str,
    security_log: bool,
    location: &str,
    request_id: i32,
    retries: Option<i32>,
    retry_interval: Option<i32>,
    oldest_timestamp: Option<DateTime<Utc>>,
    latest_timestamp: Option<DateTime<Utc>>,
) -> CoreResult<GetLogResult> {
    info!(charge_point_id, security_log, location, request_id, "GetLog");

    let log_type = if security_log {
        LogEnumType::SecurityLog
    } else {
        LogEnumType::DiagnosticsLog
    };

    let request = GetLogRequest {
        log_type,
        request_id,
        retries,
        retry_interval,
        log: LogParametersType {
            remote_location: location.to_string(),
            oldest_timestamp,
            latest_timestamp,
        },
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands.send(charge_point_id, "GetLog", payload).await?;

    let response: GetLogResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad GetLog response: {}", e)))?;

    Ok(GetLogResult {
        status: format!("{:?}", response.status),
        filename: response.filename,
    })
}
