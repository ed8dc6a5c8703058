//! Domain events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bus topics used by this central system.
pub mod topics {
    pub const TRANSACTION_STARTED: &str = "transaction.started";
    pub const TRANSACTION_COMPLETED: &str = "transaction.completed";
    pub const BILLING_PAYMENT_REQUIRED: &str = "billing.payment.required";
    pub const OCPP_SET_CHARGING_PROFILE: &str = "ocpp.set_charging_profile";
    pub const OCPP_CLEAR_CHARGING_PROFILE: &str = "ocpp.clear_charging_profile";
    pub const NOTIFICATIONS_EVENTS: &str = "notifications.events";
}

/// Events emitted by the session/transaction/profile engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TransactionStarted {
        transaction_id: Uuid,
        ocpp_transaction_id: String,
        charge_point_id: String,
        evse_id: i32,
        user_id: Option<String>,
        meter_start_wh: f64,
        timestamp: DateTime<Utc>,
    },
    TransactionCompleted {
        transaction_id: Uuid,
        ocpp_transaction_id: String,
        charge_point_id: String,
        evse_id: i32,
        user_id: Option<String>,
        energy_wh: f64,
        cost: f64,
        currency: String,
        timestamp: DateTime<Utc>,
    },
    PaymentRequired {
        transaction_id: Uuid,
        user_id: Option<String>,
        amount: f64,
        currency: String,
        timestamp: DateTime<Utc>,
    },
    ChargingProfileSet {
        charge_point_id: String,
        evse_id: i32,
        profile_id: i32,
        /// Negative for discharge.
        limit_w: f64,
        timestamp: DateTime<Utc>,
    },
    ChargingProfileCleared {
        charge_point_id: String,
        profile_id: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    ChargePointConnected {
        charge_point_id: String,
        remote_addr: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ChargePointDisconnected {
        charge_point_id: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    FirmwareStatusChanged {
        charge_point_id: String,
        request_id: Option<i32>,
        status: String,
        timestamp: DateTime<Utc>,
    },
    Alert {
        charge_point_id: Option<String>,
        kind: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The bus topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TransactionStarted { .. } => topics::TRANSACTION_STARTED,
            Self::TransactionCompleted { .. } => topics::TRANSACTION_COMPLETED,
            Self::PaymentRequired { .. } => topics::BILLING_PAYMENT_REQUIRED,
            Self::ChargingProfileSet { .. } => topics::OCPP_SET_CHARGING_PROFILE,
            Self::ChargingProfileCleared { .. } => topics::OCPP_CLEAR_CHARGING_PROFILE,
            Self::ChargePointConnected { .. }
            | Self::ChargePointDisconnected { .. }
            | Self::FirmwareStatusChanged { .. }
            | Self::Alert { .. } => topics::NOTIFICATIONS_EVENTS,
        }
    }

    /// The charge point this event concerns, if any.
    pub fn charge_point_id(&self) -> Option<&str> {
        match self {
            Self::TransactionStarted { charge_point_id, .. }
            | Self::TransactionCompleted { charge_point_id, .. }
            | Self::ChargingProfileSet { charge_point_id, .. }
            | Self::ChargingProfileCleared { charge_point_id, .. }
            | Self::ChargePointConnected { charge_point_id, .. }
            | Self::ChargePointDisconnected { charge_point_id, .. }
            | Self::FirmwareStatusChanged { charge_point_id, .. } => Some(charge_point_id),
            Self::Alert { charge_point_id, .. } => charge_point_id.as_deref(),
            Self::PaymentRequired { .. } => None,
        }
    }
}

/// Wire envelope for bus publication. The sequence is monotonic per charge
/// point so consumers can detect gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub charge_point_id: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_mapping() {
        let ev = DomainEvent::TransactionStarted {
            transaction_id: Uuid::new_v4(),
            ocpp_transaction_id: "TX-1".into(),
            charge_point_id: "CP001".into(),
            evse_id: 1,
            user_id: Some("U1".into()),
            meter_start_wh: 0.0,
            timestamp: Utc::now(),
        };
        assert_eq!(ev.topic(), "transaction.started");
        assert_eq!(ev.charge_point_id(), Some("CP001"));
    }

    #[test]
    fn envelope_flattens_event() {
        let env = EventEnvelope {
            sequence: 3,
            charge_point_id: Some("CP001".into()),
            published_at: Utc::now(),
            event: DomainEvent::ChargePointConnected {
                charge_point_id: "CP001".into(),
                remote_addr: None,
                timestamp: Utc::now(),
            },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["type"], "charge_point_connected");
    }
}
