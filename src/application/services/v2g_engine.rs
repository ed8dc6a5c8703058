//! Charging-profile and V2G engine.
//!
//! Tracks bidirectional capability per (charge point, EVSE), validates and
//! applies discharge profiles, optimizes the export window against the
//! grid-price forecast, and rebalances site load across charging
//! connectors.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::application::commands::{
    clear_charging_profile, set_charging_profile, ClearChargingProfileCriteria,
    SharedCommandService,
};
use crate::application::events::SharedEventPublisher;
use crate::domain::{
    ChargerFilter, ChargerRepo, ChargingProfile, ConnectorStatus, CoreResult, DomainEvent,
    PowerDirection, PriceSlot, PricingOracle, ProfilePurpose, V2gCapability, V2gSession,
};
use crate::support::shutdown::ShutdownSignal;

use super::discharge_optimizer::{best_discharge_window, DischargeConstraints, DischargeWindow};
use super::profile_ledger::ProfileLedger;

/// V2G and site-balancing parameters.
#[derive(Debug, Clone)]
pub struct V2gConfig {
    /// Total import capacity of the site, kW.
    pub site_power_kw: f64,
    /// SOC floor below which discharge is refused, percent.
    pub min_soc: f64,
    /// Fraction of discharge revenue retained by the operator.
    pub operator_margin: f64,
    /// Cap on energy exported per discharge session, kWh.
    pub max_discharge_kwh: f64,
    /// Grid-price forecast refresh cadence, seconds.
    pub price_poll_interval_s: u64,
}

impl Default for V2gConfig {
    fn default() -> Self {
        Self {
            site_power_kw: 100.0,
            min_soc: 40.0,
            operator_margin: 0.1,
            max_discharge_kwh: 50.0,
            price_poll_interval_s: 900,
        }
    }
}

/// Typed outcome of a discharge request. A refusal is a result, not an
/// error; wire trouble (NotConnected, Timeout, ...) still surfaces as an
/// error.
#[derive(Debug, Clone)]
pub enum DischargeDecision {
    Applied {
        profile_id: i32,
        status: String,
    },
    Rejected {
        reason: String,
    },
}

/// Per-connector outcome of a site rebalance pass.
#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub charge_point_id: String,
    pub evse_id: i32,
    pub limit_w: f64,
    pub result: Result<String, String>,
}

pub struct V2gEngine {
    config: V2gConfig,
    commands: SharedCommandService,
    chargers: Arc<dyn ChargerRepo>,
    pricing_oracle: Arc<dyn PricingOracle>,
    publisher: SharedEventPublisher,
    profiles: Arc<ProfileLedger>,
    capabilities: DashMap<(String, i32), V2gCapability>,
    sessions: DashMap<(String, i32), V2gSession>,
    profile_ids: AtomicI32,
    forecast: RwLock<Vec<PriceSlot>>,
}

pub type SharedV2gEngine = Arc<V2gEngine>;

impl V2gEngine {
    pub fn new(
        config: V2gConfig,
        commands: SharedCommandService,
        chargers: Arc<dyn ChargerRepo>,
        pricing_oracle: Arc<dyn PricingOracle>,
        publisher: SharedEventPublisher,
        profiles: Arc<ProfileLedger>,
    ) -> SharedV2gEngine {
        Arc::new(Self {
            config,
            commands,
            chargers,
            pricing_oracle,
            publisher,
            profiles,
            capabilities: DashMap::new(),
            sessions: DashMap::new(),
            profile_ids: AtomicI32::new(1),
            forecast: RwLock::new(Vec::new()),
        })
    }

    // ── Capability tracking ────────────────────────────────

    /// Record (or refresh) what the EV declared in NotifyEVChargingNeeds.
    pub fn record_charging_needs(&self, capability: V2gCapability) {
        info!(
            charge_point_id = capability.charge_point_id.as_str(),
            evse_id = capability.evse_id,
            transfer = ?capability.requested_energy_transfer,
            soc = ?capability.state_of_charge,
            "EV charging needs recorded"
        );
        self.capabilities.insert(
            (capability.charge_point_id.clone(), capability.evse_id),
            capability,
        );
        metrics::gauge!("ocpp_v2g_capable_evses").set(
            self.capabilities
                .iter()
                .filter(|c| c.requested_energy_transfer.is_bidirectional())
                .count() as f64,
        );
    }

    pub fn capability(&self, charge_point_id: &str, evse_id: i32) -> Option<V2gCapability> {
        self.capabilities
            .get(&(charge_point_id.to_string(), evse_id))
            .map(|c| c.clone())
    }

    /// Feed a power sample from NotifyEVChargingSchedule into the active
    /// session, integrating exported energy over the elapsed interval.
    pub fn record_schedule_sample(&self, charge_point_id: &str, evse_id: i32, power_kw: f64) {
        if let Some(mut session) = self
            .sessions
            .get_mut(&(charge_point_id.to_string(), evse_id))
        {
            let now = Utc::now();
            let elapsed_h =
                (now - session.updated_at).num_milliseconds().max(0) as f64 / 3_600_000.0;
            session.energy_kwh += session.power_kw.abs() * elapsed_h;
            session.power_kw = power_kw;
            session.updated_at = now;
        }
    }

    pub fn session(&self, charge_point_id: &str, evse_id: i32) -> Option<V2gSession> {
        self.sessions
            .get(&(charge_point_id.to_string(), evse_id))
            .map(|s| s.clone())
    }

    /// Drop all V2G state for a charge point (its session went away).
    pub fn clear_charge_point(&self, charge_point_id: &str) {
        self.capabilities.retain(|(cp, _), _| cp != charge_point_id);
        self.sessions.retain(|(cp, _), _| cp != charge_point_id);
    }

    // ── Discharge ──────────────────────────────────────────

    /// Validate and apply a discharge profile of `power_kw` for
    /// `duration_s` seconds on one EVSE.
    pub async fn request_discharge(
        &self,
        charge_point_id: &str,
        evse_id: i32,
        power_kw: f64,
        duration_s: i32,
    ) -> CoreResult<DischargeDecision> {
        let capability = match self.capability(charge_point_id, evse_id) {
            Some(cap) => cap,
            None => {
                return Ok(DischargeDecision::Rejected {
                    reason: "EV has not declared charging needs".to_string(),
                })
            }
        };

        if !capability.requested_energy_transfer.is_bidirectional() {
            return Ok(DischargeDecision::Rejected {
                reason: format!(
                    "energy transfer mode {:?} is not bidirectional",
                    capability.requested_energy_transfer
                ),
            });
        }

        match capability.state_of_charge {
            None => {
                return Ok(DischargeDecision::Rejected {
                    reason: "state of charge unknown".to_string(),
                })
            }
            Some(soc) if soc <= self.config.min_soc => {
                return Ok(DischargeDecision::Rejected {
                    reason: "SOC below minimum".to_string(),
                })
            }
            Some(_) => {}
        }

        let mut power_w = power_kw.abs() * 1000.0;
        if let Some(max_w) = capability.max_discharge_power_w {
            power_w = power_w.min(max_w);
        }

        let profile_id = self.next_profile_id();
        let profile = ChargingProfile::discharge(profile_id, power_w, duration_s, Utc::now());

        let status =
            set_charging_profile(&self.commands, charge_point_id, evse_id, &profile).await?;

        if status != "Accepted" {
            warn!(
                charge_point_id,
                evse_id, status, "Charger refused discharge profile"
            );
            return Ok(DischargeDecision::Rejected {
                reason: format!("charger answered {}", status),
            });
        }

        self.profiles.record(charge_point_id, evse_id, profile);
        self.sessions.insert(
            (charge_point_id.to_string(), evse_id),
            V2gSession::start(
                charge_point_id,
                evse_id,
                PowerDirection::Discharging,
                power_w / 1000.0,
            ),
        );
        metrics::counter!("ocpp_v2g_discharge_sessions_total").increment(1);

        self.publisher
            .publish(DomainEvent::ChargingProfileSet {
                charge_point_id: charge_point_id.to_string(),
                evse_id,
                profile_id,
                limit_w: -power_w,
                timestamp: Utc::now(),
            })
            .await;

        Ok(DischargeDecision::Applied { profile_id, status })
    }

    /// Clear installed profiles on a station. A charger with nothing
    /// matching answers `Unknown`; that is passed through, not an error.
    pub async fn clear_profiles(
        &self,
        charge_point_id: &str,
        criteria: ClearChargingProfileCriteria,
    ) -> CoreResult<String> {
        let profile_id = criteria.charging_profile_id;
        let status = clear_charging_profile(&self.commands, charge_point_id, criteria).await?;

        let dropped = self.profiles.clear(charge_point_id, profile_id);
        if dropped > 0 || profile_id.is_none() {
            self.sessions.retain(|(cp, _), _| cp != charge_point_id);
        }

        self.publisher
            .publish(DomainEvent::ChargingProfileCleared {
                charge_point_id: charge_point_id.to_string(),
                profile_id,
                timestamp: Utc::now(),
            })
            .await;

        Ok(status)
    }

    /// Pick the best discharge window for an EVSE from the cached forecast.
    pub async fn plan_discharge_window(
        &self,
        charge_point_id: &str,
        evse_id: i32,
    ) -> CoreResult<Option<DischargeWindow>> {
        let Some(capability) = self.capability(charge_point_id, evse_id) else {
            return Ok(None);
        };
        if !capability.requested_energy_transfer.is_bidirectional() {
            return Ok(None);
        }

        let constraints = DischargeConstraints {
            soc: capability.state_of_charge.unwrap_or(0.0),
            min_soc: self.config.min_soc,
            battery_capacity_kwh: capability.battery_capacity_kwh.unwrap_or(0.0),
            max_discharge_power_kw: capability.max_discharge_power_w.unwrap_or(0.0) / 1000.0,
            max_discharge_kwh: self.config.max_discharge_kwh,
            operator_margin: self.config.operator_margin,
        };

        let forecast = {
            let cached = self.forecast.read().await;
            if cached.is_empty() {
                drop(cached);
                self.refresh_forecast().await?;
                self.forecast.read().await.clone()
            } else {
                cached.clone()
            }
        };

        Ok(best_discharge_window(&forecast, &constraints))
    }

    /// Re-fetch the hourly forecast from the pricing oracle.
    pub async fn refresh_forecast(&self) -> CoreResult<usize> {
        let slots = self.pricing_oracle.get_price_forecast(24).await?;
        let count = slots.len();
        *self.forecast.write().await = slots;
        Ok(count)
    }

    /// Background worker polling the grid-price forecast.
    pub fn start_price_poll(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let engine = self.clone();
        let interval = std::time::Duration::from_secs(self.config.price_poll_interval_s.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.refresh_forecast().await {
                            Ok(count) => info!(slots = count, "Grid price forecast refreshed"),
                            Err(e) => warn!(error = %e, "Grid price forecast refresh failed"),
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Price poll worker shutting down");
                        break;
                    }
                }
            }
        });
    }

    // ── Site load balancing ────────────────────────────────

    /// Split the site cap across all currently charging connectors:
    /// each gets `min(site_cap / N, connector_max)` via a
    /// ChargePointMaxProfile at stack level 0.
    pub async fn rebalance_site(&self) -> CoreResult<Vec<RebalanceOutcome>> {
        let stations = self.chargers.find_all(ChargerFilter::default()).await?;
        let mut charging: Vec<(String, i32, f64)> = Vec::new();
        for station in &stations {
            for connector in &station.connectors {
                if connector.status == ConnectorStatus::Occupied {
                    charging.push((station.id.clone(), connector.evse_id, connector.max_power_w));
                }
            }
        }

        if charging.is_empty() {
            return Ok(Vec::new());
        }

        let share_w = self.config.site_power_kw * 1000.0 / charging.len() as f64;
        info!(
            connectors = charging.len(),
            share_w, "Rebalancing site load"
        );

        let mut outcomes = Vec::with_capacity(charging.len());
        for (charge_point_id, evse_id, max_power_w) in charging {
            let limit_w = share_w.min(max_power_w);
            let profile_id = self.next_profile_id();
            let profile = ChargingProfile::power_limit(
                profile_id,
                0,
                ProfilePurpose::ChargePointMaxProfile,
                limit_w,
                None,
            );

            let result =
                match set_charging_profile(&self.commands, &charge_point_id, evse_id, &profile)
                    .await
                {
                    Ok(status) => {
                        if status == "Accepted" {
                            self.profiles.record(&charge_point_id, evse_id, profile);
                            self.publisher
                                .publish(DomainEvent::ChargingProfileSet {
                                    charge_point_id: charge_point_id.clone(),
                                    evse_id,
                                    profile_id,
                                    limit_w,
                                    timestamp: Utc::now(),
                                })
                                .await;
                        }
                        Ok(status)
                    }
                    Err(e) => {
                        warn!(
                            charge_point_id = charge_point_id.as_str(),
                            evse_id,
                            error = %e,
                            "Rebalance profile not applied"
                        );
                        Err(e.to_string())
                    }
                };

            outcomes.push(RebalanceOutcome {
                charge_point_id,
                evse_id,
                limit_w,
                result,
            });
        }

        Ok(outcomes)
    }

    /// Background worker re-running the site balance.
    pub fn start_site_balancer(self: &Arc<Self>, shutdown: ShutdownSignal, interval_s: u64) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_s.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.rebalance_site().await {
                            warn!(error = %e, "Site rebalance failed");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Site balancer shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn next_profile_id(&self) -> i32 {
        self.profile_ids.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::CommandService;
    use crate::application::events::EventPublisher;
    use crate::application::session::{Session, SessionConfig, SessionRegistry};
    use crate::domain::{EnergyTransferMode, OcppVersion};
    use crate::infrastructure::bus::BroadcastBus;
    use crate::infrastructure::memory_repos::MemoryChargerRepo;
    use crate::infrastructure::tariff_oracle::TariffOracle;
    use crate::support::ocpp_frame::OcppFrame;

    fn capability(transfer: EnergyTransferMode, soc: f64) -> V2gCapability {
        V2gCapability {
            charge_point_id: "CP001".into(),
            evse_id: 1,
            requested_energy_transfer: transfer,
            max_discharge_power_w: Some(10_000.0),
            max_discharge_current_a: Some(32.0),
            state_of_charge: Some(soc),
            battery_capacity_kwh: Some(60.0),
            departure_time: None,
            updated_at: Utc::now(),
        }
    }

    fn engine_with_registry() -> (SharedV2gEngine, crate::application::session::SharedSessionRegistry)
    {
        let registry = SessionRegistry::shared(0);
        let commands = CommandService::new(registry.clone());
        let publisher = EventPublisher::new(BroadcastBus::shared());
        let oracle = Arc::new(TariffOracle::new(
            crate::application::services::pricing::PricingConfig::default(),
        ));
        let engine = V2gEngine::new(
            V2gConfig {
                min_soc: 40.0,
                ..V2gConfig::default()
            },
            commands,
            Arc::new(MemoryChargerRepo::new()),
            oracle,
            publisher,
            Arc::new(ProfileLedger::new()),
        );
        (engine, registry)
    }

    #[tokio::test]
    async fn discharge_rejected_below_min_soc_without_wire_traffic() {
        let (engine, _registry) = engine_with_registry();
        // DC_BPT but SOC 30 under the 40 floor. No session is connected, so
        // any wire attempt would surface as NotConnected; the rejection
        // proves validation short-circuits first.
        engine.record_charging_needs(capability(EnergyTransferMode::DcBpt, 30.0));

        let decision = engine
            .request_discharge("CP001", 1, 20.0, 3600)
            .await
            .unwrap();
        match decision {
            DischargeDecision::Rejected { reason } => assert_eq!(reason, "SOC below minimum"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn discharge_rejected_without_bpt_capability() {
        let (engine, _registry) = engine_with_registry();
        engine.record_charging_needs(capability(EnergyTransferMode::Dc, 80.0));

        let decision = engine
            .request_discharge("CP001", 1, 10.0, 600)
            .await
            .unwrap();
        assert!(matches!(decision, DischargeDecision::Rejected { reason } if reason.contains("not bidirectional")));
    }

    #[tokio::test]
    async fn accepted_discharge_records_profile_and_session() {
        let (engine, registry) = engine_with_registry();
        engine.record_charging_needs(capability(EnergyTransferMode::AcBpt, 80.0));

        let (session, mut rx) = Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        );
        registry.register(session.clone());

        // Fake charger: accept whatever profile arrives.
        let responder = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let parsed = OcppFrame::parse(frame.text()).unwrap();
            // The profile must carry a negative limit.
            if let OcppFrame::Call { payload, .. } = &parsed {
                let limit = payload["chargingProfile"]["chargingSchedule"][0]
                    ["chargingSchedulePeriod"][0]["limit"]
                    .as_f64()
                    .unwrap();
                assert!(limit < 0.0);
            }
            session.resolve_result(parsed.unique_id(), serde_json::json!({"status":"Accepted"}));
        });

        let decision = engine
            .request_discharge("CP001", 1, 7.0, 1800)
            .await
            .unwrap();
        responder.await.unwrap();

        match decision {
            DischargeDecision::Applied { profile_id, status } => {
                assert_eq!(status, "Accepted");
                assert!(engine.session("CP001", 1).is_some());
                assert_eq!(
                    engine.profiles.get("CP001", 1).map(|p| p.id),
                    Some(profile_id)
                );
            }
            other => panic!("expected applied, got {other:?}"),
        }

        // Disconnect clears V2G state.
        engine.clear_charge_point("CP001");
        assert!(engine.session("CP001", 1).is_none());
        assert!(engine.capability("CP001", 1).is_none());
    }
}
