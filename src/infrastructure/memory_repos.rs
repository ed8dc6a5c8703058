//! In-memory repository implementations.
//!
//! Reference implementations of the repository ports for the binary's
//! standalone mode and for tests; a database-backed provider would sit
//! behind the same traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{
    ChargePoint, ChargerFilter, ChargerRepo, ConnectorStatus, CoreResult, Transaction, User,
    UserRepo,
};
use crate::domain::ports::TransactionRepo;

// ── Chargers ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryChargerRepo {
    points: DashMap<String, ChargePoint>,
}

impl MemoryChargerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ChargerRepo for MemoryChargerRepo {
    async fn save(&self, charge_point: ChargePoint) -> CoreResult<()> {
        self.points.insert(charge_point.id.clone(), charge_point);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<ChargePoint>> {
        Ok(self.points.get(id).map(|cp| cp.clone()))
    }

    async fn find_all(&self, filter: ChargerFilter) -> CoreResult<Vec<ChargePoint>> {
        Ok(self
            .points
            .iter()
            .filter(|cp| {
                filter.status.map_or(true, |s| cp.status == s)
                    && filter
                        .vendor
                        .as_deref()
                        .map_or(true, |v| cp.vendor.as_deref() == Some(v))
            })
            .map(|cp| cp.clone())
            .collect())
    }

    async fn find_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> CoreResult<Vec<ChargePoint>> {
        Ok(self
            .points
            .iter()
            .filter(|cp| match (cp.latitude, cp.longitude) {
                (Some(cp_lat), Some(cp_lon)) => {
                    haversine_km(lat, lon, cp_lat, cp_lon) <= radius_km
                }
                _ => false,
            })
            .map(|cp| cp.clone())
            .collect())
    }

    async fn update_status(&self, id: &str, status: ConnectorStatus) -> CoreResult<()> {
        if let Some(mut cp) = self.points.get_mut(id) {
            cp.status = status;
            cp.updated_at = Utc::now();
        }
        Ok(())
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

// ── Transactions ───────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTransactionRepo {
    transactions: DashMap<Uuid, Transaction>,
}

impl MemoryTransactionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TransactionRepo for MemoryTransactionRepo {
    async fn save(&self, transaction: Transaction) -> CoreResult<()> {
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn update(&self, transaction: Transaction) -> CoreResult<()> {
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|t| t.clone()))
    }

    async fn find_by_ocpp_id(
        &self,
        charge_point_id: &str,
        ocpp_transaction_id: &str,
    ) -> CoreResult<Option<Transaction>> {
        let mut matches: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| {
                t.charge_point_id == charge_point_id
                    && t.ocpp_transaction_id == ocpp_transaction_id
            })
            .map(|t| t.clone())
            .collect();
        matches.sort_by_key(|t| t.created_at);
        Ok(matches.pop())
    }

    async fn find_active_by_user_id(&self, user_id: &str) -> CoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.user_id.as_deref() == Some(user_id) && t.is_active())
            .map(|t| t.clone())
            .max_by_key(|t| t.created_at))
    }

    async fn find_active_by_charge_point(
        &self,
        charge_point_id: &str,
    ) -> CoreResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.charge_point_id == charge_point_id && t.is_active())
            .map(|t| t.clone())
            .collect())
    }

    async fn find_history_by_user_id(&self, user_id: &str) -> CoreResult<Vec<Transaction>> {
        let mut history: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.user_id.as_deref() == Some(user_id))
            .map(|t| t.clone())
            .collect();
        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(history)
    }

    async fn find_by_date(&self, date: NaiveDate) -> CoreResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.started_at.date_naive() == date)
            .map(|t| t.clone())
            .collect())
    }
}

// ── Users ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryUserRepo {
    users: DashMap<String, User>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<User>) -> Self {
        let repo = Self::new();
        for user in users {
            repo.users.insert(user.id.clone(), user);
        }
        repo
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<User>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ocpp_id_lookup_prefers_newest() {
        let repo = MemoryTransactionRepo::new();
        let mut first = Transaction::open("TX-1", "CP001", 1, None, None, 0.0, Utc::now());
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        let second = Transaction::open("TX-1", "CP001", 1, None, None, 100.0, Utc::now());
        let second_id = second.id;

        repo.save(first).await.unwrap();
        repo.save(second).await.unwrap();

        let found = repo.find_by_ocpp_id("CP001", "TX-1").await.unwrap().unwrap();
        assert_eq!(found.id, second_id);
    }

    #[tokio::test]
    async fn nearby_uses_haversine_radius() {
        let repo = MemoryChargerRepo::new();
        let mut close = ChargePoint::new("CP-NEAR");
        close.latitude = Some(52.52);
        close.longitude = Some(13.405);
        let mut far = ChargePoint::new("CP-FAR");
        far.latitude = Some(48.85);
        far.longitude = Some(2.35);
        repo.save(close).await.unwrap();
        repo.save(far).await.unwrap();

        let nearby = repo.find_nearby(52.52, 13.40, 5.0).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, "CP-NEAR");
    }
}
