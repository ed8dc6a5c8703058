//! NotifyEVChargingSchedule handler (2.0.1).
//!
//! The EV reports the schedule it intends to follow. The first period's
//! limit is fed into the active V2G session as a power sample (negative =
//! export).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::{CallFault, SchedulePeriod};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyEvChargingScheduleRequest {
    evse_id: i32,
    charging_schedule: ReportedSchedule,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedSchedule {
    #[serde(default)]
    charging_schedule_period: Vec<SchedulePeriod>,
}

pub struct NotifyEvChargingScheduleHandler {
    context: Arc<HandlerContext>,
}

impl NotifyEvChargingScheduleHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ActionHandler for NotifyEvChargingScheduleHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: NotifyEvChargingScheduleRequest = serde_json::from_value(payload).map_err(|e| {
            CallFault::formation(format!("invalid NotifyEVChargingSchedule: {}", e))
        })?;

        let first_limit_w = req
            .charging_schedule
            .charging_schedule_period
            .first()
            .map(|p| p.limit);

        info!(
            charge_point_id = session.charge_point_id(),
            evse_id = req.evse_id,
            periods = req.charging_schedule.charging_schedule_period.len(),
            ?first_limit_w,
            "NotifyEVChargingSchedule"
        );

        if let Some(limit_w) = first_limit_w {
            self.context.v2g.record_schedule_sample(
                session.charge_point_id(),
                req.evse_id,
                limit_w / 1000.0,
            );
        }

        Ok(serde_json::json!({ "status": "Accepted" }))
    }
}
