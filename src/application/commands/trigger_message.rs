//! TriggerMessage command.

use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::enumerations::message_trigger_enum_type::MessageTriggerEnumType;
use rust_ocpp::v2_0_1::messages::trigger_message::{
    TriggerMessageRequest, TriggerMessageResponse,
};
use tracing::info;

use crate::domain::{CoreError, CoreResult};

use super::SharedCommandService;

/// Message the charger is asked to send.
#[derive(Debug, Clone, Copy)]
pub enum TriggerType {
    BootNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
    FirmwareStatusNotification,
    LogStatusNotification,
}

pub async fn trigger_message(
    commands: &SharedCommandService,
    charge_point_id: &str,
    requested: TriggerType,
    evse_id: Option<i32>,
) -> CoreResult<String> {
    info!(charge_point_id, ?requested, ?evse_id, "TriggerMessage");

    let requested_message = match requested {
        TriggerType::BootNotification => MessageTriggerEnumType::BootNotification,
        TriggerType::Heartbeat => MessageTriggerEnumType::Heartbeat,
        TriggerType::MeterValues => MessageTriggerEnumType::MeterValues,
        TriggerType::StatusNotification => MessageTriggerEnumType::StatusNotification,
        TriggerType::FirmwareStatusNotification => {
            MessageTriggerEnumType::FirmwareStatusNotification
        }
        TriggerType::LogStatusNotification => MessageTriggerEnumType::LogStatusNotification,
    };

    let evse = evse_id.map(|id| EVSEType {
        id,
        connector_id: None,
    });

    let request = TriggerMessageRequest {
        requested_message,
        evse,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {}", e)))?;

    let result = commands
        .send(charge_point_id, "TriggerMessage", payload)
        .await?;

    let response: TriggerMessageResponse = serde_json::from_value(result)
        .map_err(|e| CoreError::Protocol(format!("bad TriggerMessage response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
