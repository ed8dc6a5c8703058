//! Charging profile domain model.
//!
//! Serializes directly to the wire shape used in SetChargingProfile /
//! ReportChargingProfiles payloads (camelCase field names). A negative
//! period limit encodes V2G discharge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Purpose of a charging profile. Carried verbatim on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilePurpose {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

/// Kind of a charging profile schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileKind {
    Absolute,
    Recurring,
    Relative,
}

/// One schedule period: from `start_period` seconds into the schedule, the
/// charging rate is limited to `limit` W (negative = discharge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePeriod {
    pub start_period: i32,
    pub limit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
}

impl SchedulePeriod {
    pub fn new(start_period: i32, limit: f64) -> Self {
        Self {
            start_period,
            limit,
            number_phases: None,
        }
    }
}

/// A charging schedule: a sorted list of periods in W.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    /// Schedule duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    /// Always `"W"` for this central system.
    pub charging_rate_unit: String,
    pub charging_schedule_period: Vec<SchedulePeriod>,
}

/// A charging profile installed on (or destined for) a charge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub id: i32,
    pub stack_level: i32,
    pub charging_profile_purpose: ProfilePurpose,
    pub charging_profile_kind: ProfileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub charging_schedule: Vec<ChargingSchedule>,
}

impl ChargingProfile {
    /// A single-period absolute profile limiting charge power to `limit_w`.
    pub fn power_limit(
        id: i32,
        stack_level: i32,
        purpose: ProfilePurpose,
        limit_w: f64,
        duration_s: Option<i32>,
    ) -> Self {
        Self {
            id,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ProfileKind::Absolute,
            valid_from: None,
            valid_to: None,
            transaction_id: None,
            charging_schedule: vec![ChargingSchedule {
                id,
                start_schedule: None,
                duration: duration_s,
                charging_rate_unit: "W".to_string(),
                charging_schedule_period: vec![SchedulePeriod::new(0, limit_w)],
            }],
        }
    }

    /// A single-period discharge profile exporting `power_w` (stored as a
    /// negative limit) for `duration_s` starting at `start`.
    pub fn discharge(
        id: i32,
        power_w: f64,
        duration_s: i32,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            stack_level: 0,
            charging_profile_purpose: ProfilePurpose::TxProfile,
            charging_profile_kind: ProfileKind::Absolute,
            valid_from: None,
            valid_to: None,
            transaction_id: None,
            charging_schedule: vec![ChargingSchedule {
                id,
                start_schedule: Some(start),
                duration: Some(duration_s),
                charging_rate_unit: "W".to_string(),
                charging_schedule_period: vec![SchedulePeriod::new(0, -power_w.abs())],
            }],
        }
    }

    /// True when any period exports power to the grid.
    pub fn is_discharge(&self) -> bool {
        self.charging_schedule
            .iter()
            .flat_map(|s| &s.charging_schedule_period)
            .any(|p| p.limit < 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_camel_case() {
        let profile = ChargingProfile::power_limit(7, 0, ProfilePurpose::ChargePointMaxProfile, 11_000.0, None);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["chargingProfilePurpose"], "ChargePointMaxProfile");
        assert_eq!(json["chargingProfileKind"], "Absolute");
        assert_eq!(json["chargingSchedule"][0]["chargingRateUnit"], "W");
        assert_eq!(
            json["chargingSchedule"][0]["chargingSchedulePeriod"][0]["startPeriod"],
            0
        );
    }

    #[test]
    fn negative_limit_marks_discharge() {
        let charge = ChargingProfile::power_limit(1, 0, ProfilePurpose::TxProfile, 7_000.0, None);
        assert!(!charge.is_discharge());

        let discharge = ChargingProfile::discharge(2, 10_000.0, 3600, Utc::now());
        assert!(discharge.is_discharge());
        assert_eq!(
            discharge.charging_schedule[0].charging_schedule_period[0].limit,
            -10_000.0
        );
    }
}
