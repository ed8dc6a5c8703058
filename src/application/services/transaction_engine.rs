//! Transaction lifecycle engine.
//!
//! Drives Started/Updated/Ended events from both protocol versions onto a
//! single transaction model, reconciles Ended events whose transaction id
//! is unknown, and closes billing. Updates to a single transaction are
//! serialized through a per-transaction lock; different transactions run
//! in parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::events::SharedEventPublisher;
use crate::domain::{
    CoreResult, DomainEvent, Transaction, TransactionRepo, TransactionStatus,
};

use super::authorization::{AuthorizationStatus, SharedAuthorizationService};
use super::charge_point::SharedChargePointService;
use super::pricing::{session_cost, PricingConfig};
use super::profile_ledger::ProfileLedger;

/// Tolerance before an advisory limit breach is reported, W.
const LIMIT_CHECK_TOLERANCE_W: f64 = 100.0;

/// Normalized transaction event data, produced by the 1.6 and 2.0.1
/// handlers.
#[derive(Debug, Clone)]
pub struct TxEventData {
    pub ocpp_transaction_id: String,
    pub evse_id: i32,
    pub id_token: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Meter register reading, Wh.
    pub meter_wh: Option<f64>,
    pub power_w: Option<f64>,
    pub soc: Option<f64>,
}

pub struct TransactionEngine {
    transactions: Arc<dyn TransactionRepo>,
    charge_points: SharedChargePointService,
    authorization: SharedAuthorizationService,
    publisher: SharedEventPublisher,
    profiles: Arc<ProfileLedger>,
    pricing: PricingConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

pub type SharedTransactionEngine = Arc<TransactionEngine>;

impl TransactionEngine {
    pub fn new(
        transactions: Arc<dyn TransactionRepo>,
        charge_points: SharedChargePointService,
        authorization: SharedAuthorizationService,
        publisher: SharedEventPublisher,
        profiles: Arc<ProfileLedger>,
        pricing: PricingConfig,
    ) -> SharedTransactionEngine {
        Arc::new(Self {
            transactions,
            charge_points,
            authorization,
            publisher,
            profiles,
            pricing,
            locks: DashMap::new(),
        })
    }

    // ── Started ────────────────────────────────────────────

    /// Handle `TransactionEvent{Started}`. Unknown or blocked tokens do not
    /// open a transaction.
    pub async fn on_started(
        &self,
        charge_point_id: &str,
        data: TxEventData,
    ) -> CoreResult<AuthorizationStatus> {
        let mut user_id = None;
        if let Some(token) = data.id_token.as_deref() {
            let decision = self.authorization.authorize(token).await?;
            if !decision.status.is_accepted() {
                return Ok(decision.status);
            }
            user_id = decision.user_id;
        }

        // Idempotency / invariant upkeep: one active transaction per
        // connector and per user.
        if let Some(existing) = self
            .transactions
            .find_by_ocpp_id(charge_point_id, &data.ocpp_transaction_id)
            .await?
        {
            if existing.is_active() {
                info!(
                    charge_point_id,
                    ocpp_transaction_id = data.ocpp_transaction_id.as_str(),
                    "Started for already-open transaction — ignoring duplicate"
                );
                return Ok(AuthorizationStatus::Accepted);
            }
        }

        if let Some(user) = user_id.as_deref() {
            if let Some(other) = self.transactions.find_active_by_user_id(user).await? {
                if other.charge_point_id != charge_point_id || other.evse_id != data.evse_id {
                    warn!(
                        charge_point_id,
                        user_id = user,
                        other_transaction = %other.id,
                        "User already has an active transaction elsewhere"
                    );
                    return Ok(AuthorizationStatus::ConcurrentTx);
                }
            }
        }

        // A stale active transaction on the same connector is closed first
        // so billing converges rather than leaking an open session.
        let stale: Vec<Transaction> = self
            .transactions
            .find_active_by_charge_point(charge_point_id)
            .await?
            .into_iter()
            .filter(|t| t.evse_id == data.evse_id)
            .collect();
        for tx in stale {
            warn!(
                charge_point_id,
                stale_transaction = %tx.id,
                "Closing stale transaction superseded by new Started"
            );
            self.close_transaction(tx, None, data.timestamp).await?;
        }

        let transaction = Transaction::open(
            data.ocpp_transaction_id.clone(),
            charge_point_id,
            data.evse_id,
            user_id.clone(),
            data.id_token.clone(),
            data.meter_wh.unwrap_or(0.0),
            data.timestamp,
        );
        self.transactions.save(transaction.clone()).await?;
        self.charge_points
            .occupy(charge_point_id, data.evse_id)
            .await?;

        metrics::counter!("ocpp_transactions_total", "status" => "started").increment(1);
        info!(
            charge_point_id,
            transaction_id = %transaction.id,
            ocpp_transaction_id = transaction.ocpp_transaction_id.as_str(),
            evse_id = data.evse_id,
            "Transaction started"
        );

        self.publisher
            .publish(DomainEvent::TransactionStarted {
                transaction_id: transaction.id,
                ocpp_transaction_id: transaction.ocpp_transaction_id.clone(),
                charge_point_id: charge_point_id.to_string(),
                evse_id: data.evse_id,
                user_id,
                meter_start_wh: transaction.meter_start_wh,
                timestamp: data.timestamp,
            })
            .await;

        Ok(AuthorizationStatus::Accepted)
    }

    // ── Updated ────────────────────────────────────────────

    /// Handle `TransactionEvent{Updated}`: append meter samples and run the
    /// advisory profile-limit check.
    pub async fn on_updated(&self, charge_point_id: &str, data: TxEventData) -> CoreResult<()> {
        let Some(tx) = self
            .transactions
            .find_by_ocpp_id(charge_point_id, &data.ocpp_transaction_id)
            .await?
        else {
            warn!(
                charge_point_id,
                ocpp_transaction_id = data.ocpp_transaction_id.as_str(),
                "Updated for unknown transaction"
            );
            return Ok(());
        };
        if !tx.is_active() {
            return Ok(());
        }

        let lock = self.lock_for(tx.id);
        let _guard = lock.lock().await;

        let mut tx = match self.transactions.find_by_id(tx.id).await? {
            Some(tx) if tx.is_active() => tx,
            _ => return Ok(()),
        };

        if let Some(meter) = data.meter_wh {
            tx.meter_stop_wh = Some(meter);
        }
        tx.power_w = data.power_w.or(tx.power_w);
        tx.soc = data.soc.or(tx.soc);
        tx.status = TransactionStatus::Updated;
        tx.updated_at = Utc::now();
        self.transactions.update(tx.clone()).await?;

        self.charge_points
            .record_meter(charge_point_id, data.evse_id, data.power_w, data.meter_wh)
            .await?;

        // Advisory only: a breach is reported, never enforced here.
        if let (Some(power), Some(limit)) = (
            data.power_w,
            self.profiles.applied_limit_w(charge_point_id, data.evse_id),
        ) {
            if limit >= 0.0 && power > limit + LIMIT_CHECK_TOLERANCE_W {
                warn!(
                    charge_point_id,
                    evse_id = data.evse_id,
                    power_w = power,
                    limit_w = limit,
                    "Charging above the applied profile limit"
                );
                metrics::counter!("ocpp_profile_limit_breaches_total").increment(1);
            }
        }

        Ok(())
    }

    /// Handle a MeterValues report, which carries no transaction id: the
    /// sample is attached to the active transaction on the connector, if
    /// any, and always recorded on the connector itself.
    pub async fn on_meter_sample(
        &self,
        charge_point_id: &str,
        evse_id: i32,
        meter_wh: Option<f64>,
        power_w: Option<f64>,
        soc: Option<f64>,
    ) -> CoreResult<()> {
        let active = self
            .transactions
            .find_active_by_charge_point(charge_point_id)
            .await?
            .into_iter()
            .find(|t| t.evse_id == evse_id);

        match active {
            Some(tx) => {
                self.on_updated(
                    charge_point_id,
                    TxEventData {
                        ocpp_transaction_id: tx.ocpp_transaction_id,
                        evse_id,
                        id_token: None,
                        timestamp: Utc::now(),
                        meter_wh,
                        power_w,
                        soc,
                    },
                )
                .await
            }
            None => {
                self.charge_points
                    .record_meter(charge_point_id, evse_id, power_w, meter_wh)
                    .await
            }
        }
    }

    // ── Ended ──────────────────────────────────────────────

    /// Handle `TransactionEvent{Ended}`, reconciling unknown transaction
    /// ids. Always answers `Accepted`: the charger cannot act on a
    /// server-side mismatch.
    pub async fn on_ended(
        &self,
        charge_point_id: &str,
        data: TxEventData,
    ) -> CoreResult<AuthorizationStatus> {
        let tx = match self
            .transactions
            .find_by_ocpp_id(charge_point_id, &data.ocpp_transaction_id)
            .await?
        {
            Some(tx) if tx.status == TransactionStatus::Completed => {
                // Idempotent: a repeated Ended is a no-op.
                info!(
                    charge_point_id,
                    transaction_id = %tx.id,
                    "Ended for already-completed transaction — no-op"
                );
                return Ok(AuthorizationStatus::Accepted);
            }
            Some(tx) => Some(tx),
            None => self.resolve_unknown_ended(charge_point_id, &data).await?,
        };

        let Some(tx) = tx else {
            return Ok(AuthorizationStatus::Accepted);
        };

        self.close_transaction(tx, data.meter_wh, data.timestamp).await?;
        Ok(AuthorizationStatus::Accepted)
    }

    /// Fallback resolution when the Ended event names an unknown id: the
    /// single active transaction for (charge point, token user), or, with
    /// no token, the single active transaction on the charge point.
    async fn resolve_unknown_ended(
        &self,
        charge_point_id: &str,
        data: &TxEventData,
    ) -> CoreResult<Option<Transaction>> {
        if let Some(token) = data.id_token.as_deref() {
            let decision = self.authorization.authorize(token).await?;
            if let Some(user_id) = decision.user_id {
                if let Some(tx) = self.transactions.find_active_by_user_id(&user_id).await? {
                    if tx.charge_point_id == charge_point_id {
                        warn!(
                            charge_point_id,
                            unknown_id = data.ocpp_transaction_id.as_str(),
                            resolved_transaction = %tx.id,
                            "Ended with unknown transaction id resolved via user"
                        );
                        return Ok(Some(tx));
                    }
                }
            }
        }

        let active = self
            .transactions
            .find_active_by_charge_point(charge_point_id)
            .await?;
        if active.len() == 1 {
            let tx = active.into_iter().next().unwrap();
            warn!(
                charge_point_id,
                unknown_id = data.ocpp_transaction_id.as_str(),
                resolved_transaction = %tx.id,
                "Ended with unknown transaction id resolved as the only active transaction"
            );
            return Ok(Some(tx));
        }

        error!(
            charge_point_id,
            unknown_id = data.ocpp_transaction_id.as_str(),
            candidates = active.len(),
            "Ended could not be matched to a transaction"
        );
        self.publisher
            .publish(DomainEvent::Alert {
                charge_point_id: Some(charge_point_id.to_string()),
                kind: "unmatched_transaction_end".to_string(),
                detail: format!(
                    "Ended event for unknown transaction {} with {} active candidates",
                    data.ocpp_transaction_id,
                    active.len()
                ),
                timestamp: Utc::now(),
            })
            .await;
        Ok(None)
    }

    /// Close a transaction: final meter, cost, Completed, connector release,
    /// events.
    async fn close_transaction(
        &self,
        tx: Transaction,
        final_meter_wh: Option<f64>,
        ended_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let lock = self.lock_for(tx.id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent close may have won.
        let mut tx = match self.transactions.find_by_id(tx.id).await? {
            Some(tx) if tx.status != TransactionStatus::Completed => tx,
            _ => return Ok(()),
        };

        // The stored reading must honour meter_stop >= meter_start; a final
        // register below the start (meter reset, bogus sample) is clamped.
        let meter_stop_wh = final_meter_wh
            .or(tx.meter_stop_wh)
            .unwrap_or(tx.meter_start_wh);
        tx.meter_stop_wh = Some(meter_stop_wh.max(tx.meter_start_wh));
        tx.ended_at = Some(ended_at);

        let energy_wh = tx.total_energy_wh();
        let cost = session_cost(&self.pricing, tx.started_at, ended_at, energy_wh);

        tx.status = TransactionStatus::Completed;
        tx.cost = Some(cost.total);
        tx.currency = Some(cost.currency.clone());
        tx.updated_at = Utc::now();
        self.transactions.update(tx.clone()).await?;

        self.charge_points
            .release(&tx.charge_point_id, tx.evse_id)
            .await?;
        self.locks.remove(&tx.id);

        metrics::counter!("ocpp_transactions_total", "status" => "completed").increment(1);
        metrics::counter!("ocpp_energy_wh_total").increment(energy_wh as u64);
        metrics::counter!("ocpp_billed_cost_cents_total", "currency" => cost.currency.clone())
            .increment((cost.total * 100.0).max(0.0) as u64);
        metrics::histogram!("charging_session_duration_seconds")
            .record(tx.duration().num_seconds().max(0) as f64);

        info!(
            charge_point_id = tx.charge_point_id.as_str(),
            transaction_id = %tx.id,
            energy_wh,
            cost = cost.total,
            currency = cost.currency.as_str(),
            "Transaction completed"
        );

        self.publisher
            .publish(DomainEvent::TransactionCompleted {
                transaction_id: tx.id,
                ocpp_transaction_id: tx.ocpp_transaction_id.clone(),
                charge_point_id: tx.charge_point_id.clone(),
                evse_id: tx.evse_id,
                user_id: tx.user_id.clone(),
                energy_wh,
                cost: cost.total,
                currency: cost.currency.clone(),
                timestamp: ended_at,
            })
            .await;
        self.publisher
            .publish(DomainEvent::PaymentRequired {
                transaction_id: tx.id,
                user_id: tx.user_id.clone(),
                amount: cost.total,
                currency: cost.currency,
                timestamp: ended_at,
            })
            .await;

        Ok(())
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventPublisher;
    use crate::application::services::authorization::AuthorizationService;
    use crate::application::services::charge_point::ChargePointService;
    use crate::domain::{ConnectorStatus, User};
    use crate::infrastructure::bus::BroadcastBus;
    use crate::infrastructure::memory_cache::MemoryCache;
    use crate::infrastructure::memory_repos::{
        MemoryChargerRepo, MemoryTransactionRepo, MemoryUserRepo,
    };
    use chrono::TimeZone;

    struct Fixture {
        engine: SharedTransactionEngine,
        charge_points: SharedChargePointService,
        transactions: Arc<MemoryTransactionRepo>,
        bus: Arc<BroadcastBus>,
    }

    async fn fixture() -> Fixture {
        let chargers = Arc::new(MemoryChargerRepo::new());
        let transactions = Arc::new(MemoryTransactionRepo::new());
        let users = Arc::new(MemoryUserRepo::with_users(vec![User::new(
            "U1",
            "u1@example.com",
            "User One",
        )]));
        let bus = BroadcastBus::shared();
        let publisher = EventPublisher::new(bus.clone());
        let charge_points = ChargePointService::new(chargers);
        charge_points
            .register_or_update("CP001", "ACME", "X1", None, None)
            .await
            .unwrap();
        charge_points.ensure_connectors("CP001", 2).await.unwrap();

        let authorization = AuthorizationService::new(
            users,
            MemoryCache::shared(),
            std::time::Duration::from_secs(60),
        );
        let engine = TransactionEngine::new(
            transactions.clone(),
            charge_points.clone(),
            authorization,
            publisher,
            Arc::new(ProfileLedger::new()),
            PricingConfig {
                base_rate: 0.75,
                peak_multiplier: 1.5,
                peak_start_hour: 18,
                peak_end_hour: 21,
                idle_fee_per_min: 0.0,
                idle_grace_min: 0,
                currency: "EUR".into(),
            },
        );
        Fixture {
            engine,
            charge_points,
            transactions,
            bus,
        }
    }

    fn event(ocpp_id: &str, token: Option<&str>, meter: Option<f64>, hour: u32) -> TxEventData {
        TxEventData {
            ocpp_transaction_id: ocpp_id.to_string(),
            evse_id: 1,
            id_token: token.map(String::from),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 15, hour, 0, 0).unwrap(),
            meter_wh: meter,
            power_w: None,
            soc: None,
        }
    }

    #[tokio::test]
    async fn started_opens_transaction_and_occupies_connector() {
        let f = fixture().await;
        let mut rx = f
            .bus
            .subscribe_messages(crate::domain::events::topics::TRANSACTION_STARTED)
            .await;

        let status = f
            .engine
            .on_started("CP001", event("TX-123", Some("U1"), Some(0.0), 10))
            .await
            .unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);

        let tx = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Started);
        assert_eq!(tx.user_id.as_deref(), Some("U1"));

        let cp = f.charge_points.find("CP001").await.unwrap().unwrap();
        assert_eq!(cp.status, ConnectorStatus::Occupied);

        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unknown_token_is_blocked_and_opens_nothing() {
        let f = fixture().await;
        let status = f
            .engine
            .on_started("CP001", event("TX-1", Some("GHOST"), Some(0.0), 10))
            .await
            .unwrap();
        assert_eq!(status, AuthorizationStatus::Blocked);
        assert!(f
            .transactions
            .find_by_ocpp_id("CP001", "TX-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ended_with_unknown_id_falls_back_to_user() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-123", Some("U1"), Some(1_000.0), 10))
            .await
            .unwrap();

        // Ended names an id the server never saw; the token identifies the user.
        let status = f
            .engine
            .on_ended("CP001", event("TX-XXX", Some("U1"), Some(11_000.0), 12))
            .await
            .unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);

        let tx = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.total_energy_wh(), 10_000.0);
        // 10 kWh × 0.75 off-peak.
        assert!((tx.cost.unwrap() - 7.5).abs() < 1e-9);

        let cp = f.charge_points.find("CP001").await.unwrap().unwrap();
        assert_eq!(cp.status, ConnectorStatus::Available);
    }

    #[tokio::test]
    async fn peak_start_hour_applies_multiplier() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-9", Some("U1"), Some(0.0), 19))
            .await
            .unwrap();
        f.engine
            .on_ended("CP001", event("TX-9", Some("U1"), Some(10_000.0), 20))
            .await
            .unwrap();

        let tx = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-9")
            .await
            .unwrap()
            .unwrap();
        // 10 kWh × 0.75 × 1.5 = 11.25
        assert!((tx.cost.unwrap() - 11.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_ended_is_idempotent() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-7", Some("U1"), Some(0.0), 10))
            .await
            .unwrap();
        f.engine
            .on_ended("CP001", event("TX-7", Some("U1"), Some(5_000.0), 11))
            .await
            .unwrap();

        let first = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-7")
            .await
            .unwrap()
            .unwrap();

        let status = f
            .engine
            .on_ended("CP001", event("TX-7", Some("U1"), Some(9_999.0), 12))
            .await
            .unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);

        let second = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-7")
            .await
            .unwrap()
            .unwrap();
        // No-op: meter and cost unchanged.
        assert_eq!(first.meter_stop_wh, second.meter_stop_wh);
        assert_eq!(first.cost, second.cost);
    }

    #[tokio::test]
    async fn concurrent_user_transaction_is_rejected() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-1", Some("U1"), Some(0.0), 10))
            .await
            .unwrap();

        let mut on_other_evse = event("TX-2", Some("U1"), Some(0.0), 10);
        on_other_evse.evse_id = 2;
        let status = f.engine.on_started("CP001", on_other_evse).await.unwrap();
        assert_eq!(status, AuthorizationStatus::ConcurrentTx);
    }

    #[tokio::test]
    async fn ended_with_no_token_closes_single_active() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-1", Some("U1"), Some(500.0), 10))
            .await
            .unwrap();

        let status = f
            .engine
            .on_ended("CP001", event("TX-UNKNOWN", None, Some(2_500.0), 11))
            .await
            .unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);

        let tx = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.total_energy_wh(), 2_000.0);
    }

    #[tokio::test]
    async fn negative_energy_delta_bills_zero() {
        let f = fixture().await;
        f.engine
            .on_started("CP001", event("TX-1", Some("U1"), Some(5_000.0), 10))
            .await
            .unwrap();
        f.engine
            .on_ended("CP001", event("TX-1", Some("U1"), Some(1_000.0), 11))
            .await
            .unwrap();

        let tx = f
            .transactions
            .find_by_ocpp_id("CP001", "TX-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.total_energy_wh(), 0.0);
        assert_eq!(tx.cost, Some(0.0));
        // The persisted reading is clamped, not just the derived energy.
        assert_eq!(tx.meter_stop_wh, Some(tx.meter_start_wh));
    }
}
