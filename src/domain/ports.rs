//! Collaborator ports.
//!
//! The core consumes these contracts; it does not implement persistence,
//! remote caching, broker transport, or price discovery. Reference
//! in-memory implementations live under `infrastructure` for the binary
//! and for tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::charge_point::{ChargePoint, ConnectorStatus};
use super::error::CoreResult;
use super::transaction::Transaction;
use super::user::User;

// ── Charger repository ─────────────────────────────────────────

/// Filter for charger enumeration.
#[derive(Debug, Clone, Default)]
pub struct ChargerFilter {
    pub status: Option<ConnectorStatus>,
    pub vendor: Option<String>,
}

#[async_trait]
pub trait ChargerRepo: Send + Sync {
    async fn save(&self, charge_point: ChargePoint) -> CoreResult<()>;
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<ChargePoint>>;
    async fn find_all(&self, filter: ChargerFilter) -> CoreResult<Vec<ChargePoint>>;
    async fn find_nearby(&self, lat: f64, lon: f64, radius_km: f64)
        -> CoreResult<Vec<ChargePoint>>;
    async fn update_status(&self, id: &str, status: ConnectorStatus) -> CoreResult<()>;
}

// ── Transaction repository ─────────────────────────────────────

#[async_trait]
pub trait TransactionRepo: Send + Sync {
    async fn save(&self, transaction: Transaction) -> CoreResult<()>;
    async fn update(&self, transaction: Transaction) -> CoreResult<()>;
    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<Transaction>>;
    /// Locate by the charger-chosen wire identifier, newest first.
    async fn find_by_ocpp_id(
        &self,
        charge_point_id: &str,
        ocpp_transaction_id: &str,
    ) -> CoreResult<Option<Transaction>>;
    async fn find_active_by_user_id(&self, user_id: &str) -> CoreResult<Option<Transaction>>;
    async fn find_active_by_charge_point(&self, charge_point_id: &str)
        -> CoreResult<Vec<Transaction>>;
    async fn find_history_by_user_id(&self, user_id: &str) -> CoreResult<Vec<Transaction>>;
    async fn find_by_date(&self, date: NaiveDate) -> CoreResult<Vec<Transaction>>;
}

// ── User repository ────────────────────────────────────────────

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>>;
}

// ── Cache ──────────────────────────────────────────────────────

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: std::time::Duration) -> CoreResult<()>;
    async fn delete(&self, key: &str) -> CoreResult<()>;
    async fn ping(&self) -> CoreResult<()>;
}

// ── Event bus ──────────────────────────────────────────────────

/// A message delivered to a bus subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CoreResult<()>;
    /// Subscribe to a topic; messages arrive on the returned channel until
    /// the receiver is dropped.
    async fn subscribe(&self, topic: &str) -> CoreResult<mpsc::Receiver<BusMessage>>;
}

// ── Pricing oracle ─────────────────────────────────────────────

/// One hour of the grid-price forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSlot {
    pub starts_at: DateTime<Utc>,
    /// Price per kWh in the configured currency.
    pub price: f64,
    pub is_peak: bool,
}

#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn get_current_price(&self) -> CoreResult<f64>;
    async fn is_peak_hour(&self) -> CoreResult<bool>;
    async fn get_price_forecast(&self, hours: u32) -> CoreResult<Vec<PriceSlot>>;
}
