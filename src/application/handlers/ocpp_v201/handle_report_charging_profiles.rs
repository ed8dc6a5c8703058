//! ReportChargingProfiles handler (2.0.1).
//!
//! Profile reports arrive in response to GetChargingProfiles, referencing
//! its request id; a report may span several messages (`tbc`).

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v2_0_1::messages::report_charging_profiles::{
    ReportChargingProfilesRequest, ReportChargingProfilesResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{ActionHandler, HandlerContext};
use crate::application::session::Session;
use crate::domain::CallFault;

pub struct ReportChargingProfilesHandler {
    _context: Arc<HandlerContext>,
}

impl ReportChargingProfilesHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { _context: context }
    }
}

#[async_trait]
impl ActionHandler for ReportChargingProfilesHandler {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault> {
        let req: ReportChargingProfilesRequest = serde_json::from_value(payload)
            .map_err(|e| CallFault::formation(format!("invalid ReportChargingProfiles: {}", e)))?;

        let tbc = req.tbc.unwrap_or(false);
        info!(
            charge_point_id = session.charge_point_id(),
            request_id = req.request_id,
            evse_id = req.evse_id,
            profiles = req.charging_profile.len(),
            tbc,
            "ReportChargingProfiles"
        );

        for profile in &req.charging_profile {
            info!(
                charge_point_id = session.charge_point_id(),
                profile_id = profile.id,
                stack_level = profile.stack_level,
                purpose = ?profile.charging_profile_purpose,
                kind = ?profile.charging_profile_kind,
                schedules = profile.charging_schedule.len(),
                "Reported profile"
            );
        }

        serde_json::to_value(&ReportChargingProfilesResponse {})
            .map_err(|e| CallFault::internal(e.to_string()))
    }
}
