//! OCPP 1.6 fallback handlers.
//!
//! Legacy stations speak StartTransaction / StopTransaction and the wider
//! 1.6 status vocabulary; these handlers fold both onto the 2.0.1-shaped
//! state the engines maintain.

mod handle_authorize;
mod handle_boot_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::{HandlerContext, HandlerTable};

/// In 1.6 the central system assigns the numeric transaction id returned
/// in StartTransaction.conf.
static NEXT_V16_TRANSACTION_ID: AtomicI32 = AtomicI32::new(1);

pub(crate) fn next_transaction_id() -> i32 {
    NEXT_V16_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst)
}

/// Build the 1.6 action registry.
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
        "StartTransaction",
        Arc::new(handle_start_transaction::StartTransactionHandler::new(context.clone())),
    );
    table.register(
        "StopTransaction",
        Arc::new(handle_stop_transaction::StopTransactionHandler::new(context.clone())),
    );
    table.register(
        "MeterValues",
        Arc::new(handle_meter_values::MeterValuesHandler::new(context.clone())),
    );
    table.register(
        "Authorize",
        Arc::new(handle_authorize::AuthorizeHandler::new(context)),
    );
    table
}
