//! Book-keeping of charging profiles the central system has applied.
//!
//! Shared between the profile/V2G engine (writes on SetChargingProfile /
//! ClearChargingProfile) and the transaction engine (advisory limit checks
//! on meter updates).

use dashmap::DashMap;

use crate::domain::ChargingProfile;

#[derive(Default)]
pub struct ProfileLedger {
    /// Keyed by (charge_point_id, evse_id).
    applied: DashMap<(String, i32), ChargingProfile>,
}

impl ProfileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, charge_point_id: &str, evse_id: i32, profile: ChargingProfile) {
        self.applied
            .insert((charge_point_id.to_string(), evse_id), profile);
    }

    /// Remove profiles for a charge point; `profile_id` restricts the clear
    /// to one profile. Returns how many entries were dropped.
    pub fn clear(&self, charge_point_id: &str, profile_id: Option<i32>) -> usize {
        let before = self.applied.len();
        self.applied.retain(|(cp, _), profile| {
            if cp != charge_point_id {
                return true;
            }
            match profile_id {
                Some(id) => profile.id != id,
                None => false,
            }
        });
        before - self.applied.len()
    }

    pub fn get(&self, charge_point_id: &str, evse_id: i32) -> Option<ChargingProfile> {
        self.applied
            .get(&(charge_point_id.to_string(), evse_id))
            .map(|p| p.clone())
    }

    /// The first-period limit in force on a connector, W. Negative means a
    /// discharge profile is active.
    pub fn applied_limit_w(&self, charge_point_id: &str, evse_id: i32) -> Option<f64> {
        self.get(charge_point_id, evse_id).and_then(|profile| {
            profile
                .charging_schedule
                .first()
                .and_then(|s| s.charging_schedule_period.first())
                .map(|p| p.limit)
        })
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProfilePurpose;

    #[test]
    fn record_and_clear_by_id() {
        let ledger = ProfileLedger::new();
        ledger.record(
            "CP001",
            1,
            ChargingProfile::power_limit(7, 0, ProfilePurpose::TxProfile, 11_000.0, None),
        );
        ledger.record(
            "CP001",
            2,
            ChargingProfile::power_limit(8, 0, ProfilePurpose::TxProfile, 7_400.0, None),
        );

        assert_eq!(ledger.applied_limit_w("CP001", 1), Some(11_000.0));
        assert_eq!(ledger.clear("CP001", Some(7)), 1);
        assert_eq!(ledger.applied_limit_w("CP001", 1), None);
        assert_eq!(ledger.clear("CP001", None), 1);
        assert!(ledger.is_empty());
    }
}
