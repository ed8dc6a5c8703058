//! OCPP 2.0.1 charger-initiated message handlers.

mod handle_authorize;
mod handle_boot_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_log_status_notification;
mod handle_meter_values;
mod handle_notify_ev_charging_needs;
mod handle_notify_ev_charging_schedule;
mod handle_report_charging_profiles;
mod handle_status_notification;
mod handle_transaction_event;

use std::sync::Arc;

use super::{HandlerContext, HandlerTable};

/// Build the 2.0.1 action registry.
pub fn handler_table(context: Arc<HandlerContext>) -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register(
        "BootNotification",
        Arc::new(handle_boot_notification::BootNotificationHandler::new(context.clone())),
    );
    table.register(
        "Heartbeat",
        Arc::new(handle_heartbeat::HeartbeatHandler::new(context.clone())),
    );
    table.register(
        "StatusNotification",
        Arc::new(handle_status_notification::StatusNotificationHandler::new(context.clone())),
    );
    table.register(
        "TransactionEvent",
        Arc::new(handle_transaction_event::TransactionEventHandler::new(context.clone())),
    );
    table.register(
        "MeterValues",
        Arc::new(handle_meter_values::MeterValuesHandler::new(context.clone())),
    );
    table.register(
        "FirmwareStatusNotification",
        Arc::new(handle_firmware_status_notification::FirmwareStatusNotificationHandler::new(
            context.clone(),
        )),
    );
    table.register(
        "LogStatusNotification",
        Arc::new(handle_log_status_notification::LogStatusNotificationHandler::new(
            context.clone(),
        )),
    );
    table.register(
        "NotifyEVChargingNeeds",
        Arc::new(handle_notify_ev_charging_needs::NotifyEvChargingNeedsHandler::new(
            context.clone(),
        )),
    );
    table.register(
        "NotifyEVChargingSchedule",
        Arc::new(handle_notify_ev_charging_schedule::NotifyEvChargingScheduleHandler::new(
            context.clone(),
        )),
    );
    table.register(
        "ReportChargingProfiles",
        Arc::new(handle_report_charging_profiles::ReportChargingProfilesHandler::new(
            context.clone(),
        )),
    );
    table.register(
        "Authorize",
        Arc::new(handle_authorize::AuthorizeHandler::new(context)),
    );
    table
}
