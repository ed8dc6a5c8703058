//! Charging transaction entity and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Started,
    Updated,
    Stopped,
    Completed,
}

/// A charging (or discharging) transaction.
///
/// `id` is server-assigned; `ocpp_transaction_id` is the charger-chosen
/// identifier from the wire and may differ. At most one Started transaction
/// exists per (charge point, connector) and per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub ocpp_transaction_id: String,
    pub user_id: Option<String>,
    pub id_token: Option<String>,
    pub charge_point_id: String,
    pub evse_id: i32,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub meter_start_wh: f64,
    pub meter_stop_wh: Option<f64>,
    /// Most recent instantaneous power sample, W.
    pub power_w: Option<f64>,
    /// Most recent state-of-charge sample, percent.
    pub soc: Option<f64>,
    pub cost: Option<f64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn open(
        ocpp_transaction_id: impl Into<String>,
        charge_point_id: impl Into<String>,
        evse_id: i32,
        user_id: Option<String>,
        id_token: Option<String>,
        meter_start_wh: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ocpp_transaction_id: ocpp_transaction_id.into(),
            user_id,
            id_token,
            charge_point_id: charge_point_id.into(),
            evse_id,
            status: TransactionStatus::Started,
            started_at,
            ended_at: None,
            meter_start_wh,
            meter_stop_wh: None,
            power_w: None,
            soc: None,
            cost: None,
            currency: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An active transaction has not yet reached Stopped or Completed.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Started | TransactionStatus::Updated)
    }

    /// Total delivered energy in Wh. Non-positive differences (meter reset,
    /// missing stop reading) count as zero.
    pub fn total_energy_wh(&self) -> f64 {
        match self.meter_stop_wh {
            Some(stop) if stop > self.meter_start_wh => stop - self.meter_start_wh,
            _ => 0.0,
        }
    }

    /// Session duration; zero until the transaction has ended.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at
            .map(|end| end - self.started_at)
            .unwrap_or_else(chrono::Duration::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> Transaction {
        Transaction::open("TX-1", "CP001", 1, Some("U1".into()), Some("U1".into()), 1000.0, Utc::now())
    }

    #[test]
    fn energy_guard_on_non_positive_delta() {
        let mut t = tx();
        t.meter_stop_wh = Some(500.0);
        assert_eq!(t.total_energy_wh(), 0.0);

        t.meter_stop_wh = Some(1000.0);
        assert_eq!(t.total_energy_wh(), 0.0);

        t.meter_stop_wh = Some(3500.0);
        assert_eq!(t.total_energy_wh(), 2500.0);
    }

    #[test]
    fn active_until_stopped() {
        let mut t = tx();
        assert!(t.is_active());
        t.status = TransactionStatus::Updated;
        assert!(t.is_active());
        t.status = TransactionStatus::Completed;
        assert!(!t.is_active());
    }
}
