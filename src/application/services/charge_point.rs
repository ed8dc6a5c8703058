//! Charge point directory service.
//!
//! Keeps the station records behind the `ChargerRepo` port current with
//! what the wire reports: boot registrations, heartbeats, connector and
//! station status transitions, meter samples.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{
    ChargePoint, ChargerRepo, Connector, ConnectorStatus, CoreError, CoreResult,
};

/// Default rated power for connectors the station has not described, W.
const DEFAULT_CONNECTOR_MAX_POWER_W: f64 = 22_000.0;

pub struct ChargePointService {
    chargers: Arc<dyn ChargerRepo>,
}

pub type SharedChargePointService = Arc<ChargePointService>;

impl ChargePointService {
    pub fn new(chargers: Arc<dyn ChargerRepo>) -> SharedChargePointService {
        Arc::new(Self { chargers })
    }

    /// Create or refresh a station record on BootNotification. Stations are
    /// never destroyed; a returning one has its identity fields refreshed.
    pub async fn register_or_update(
        &self,
        id: &str,
        vendor: &str,
        model: &str,
        serial_number: Option<&str>,
        firmware_version: Option<&str>,
    ) -> CoreResult<ChargePoint> {
        let mut cp = self
            .chargers
            .find_by_id(id)
            .await?
            .unwrap_or_else(|| ChargePoint::new(id));

        cp.vendor = Some(vendor.to_string());
        cp.model = Some(model.to_string());
        cp.serial_number = serial_number.map(String::from);
        cp.firmware_version = firmware_version.map(String::from);
        cp.status = ConnectorStatus::Available;
        cp.last_heartbeat = Some(Utc::now());
        cp.updated_at = Utc::now();

        self.chargers.save(cp.clone()).await?;
        info!(charge_point_id = id, vendor, model, "Charge point registered");
        Ok(cp)
    }

    /// Make sure at least `count` connectors exist on the record.
    pub async fn ensure_connectors(&self, id: &str, count: i32) -> CoreResult<()> {
        let mut cp = self.require(id).await?;
        let mut changed = false;
        for evse_id in 1..=count {
            if cp.connector_mut(evse_id).is_none() {
                cp.connectors
                    .push(Connector::new(evse_id, 1, DEFAULT_CONNECTOR_MAX_POWER_W));
                changed = true;
            }
        }
        if changed {
            cp.updated_at = Utc::now();
            self.chargers.save(cp).await?;
        }
        Ok(())
    }

    pub async fn heartbeat(&self, id: &str) -> CoreResult<()> {
        let mut cp = self.require(id).await?;
        cp.last_heartbeat = Some(Utc::now());
        cp.updated_at = Utc::now();
        self.chargers.save(cp).await
    }

    pub async fn update_status(&self, id: &str, status: ConnectorStatus) -> CoreResult<()> {
        self.chargers.update_status(id, status).await
    }

    /// Apply a connector status report. `evse_id` 0 addresses the whole
    /// station.
    pub async fn update_connector_status(
        &self,
        id: &str,
        evse_id: i32,
        status: ConnectorStatus,
    ) -> CoreResult<()> {
        if evse_id == 0 {
            return self.chargers.update_status(id, status).await;
        }

        let mut cp = self.require(id).await?;
        match cp.connector_mut(evse_id) {
            Some(connector) => {
                connector.status = status;
                connector.updated_at = Utc::now();
            }
            None => {
                let mut connector = Connector::new(evse_id, 1, DEFAULT_CONNECTOR_MAX_POWER_W);
                connector.status = status;
                cp.connectors.push(connector);
            }
        }
        // A faulted connector faults the station; otherwise the station
        // reflects whether any connector is busy.
        cp.status = if cp.connectors.iter().any(|c| c.status == ConnectorStatus::Faulted) {
            ConnectorStatus::Faulted
        } else if cp.connectors.iter().any(|c| c.status == ConnectorStatus::Occupied) {
            ConnectorStatus::Occupied
        } else {
            status
        };
        cp.updated_at = Utc::now();
        self.chargers.save(cp).await
    }

    /// Mark the station occupied when a transaction opens.
    pub async fn occupy(&self, id: &str, evse_id: i32) -> CoreResult<()> {
        self.update_connector_status(id, evse_id, ConnectorStatus::Occupied)
            .await
    }

    /// Release a connector when a transaction completes. A faulted station
    /// stays faulted.
    pub async fn release(&self, id: &str, evse_id: i32) -> CoreResult<()> {
        let mut cp = self.require(id).await?;
        if let Some(connector) = cp.connector_mut(evse_id) {
            if connector.status != ConnectorStatus::Faulted {
                connector.status = ConnectorStatus::Available;
                connector.updated_at = Utc::now();
            }
        }
        if cp.status != ConnectorStatus::Faulted {
            cp.status = if cp.connectors.iter().any(|c| c.status == ConnectorStatus::Occupied) {
                ConnectorStatus::Occupied
            } else {
                ConnectorStatus::Available
            };
        }
        cp.updated_at = Utc::now();
        self.chargers.save(cp).await
    }

    /// Record a meter/power sample for a connector.
    pub async fn record_meter(
        &self,
        id: &str,
        evse_id: i32,
        power_w: Option<f64>,
        meter_wh: Option<f64>,
    ) -> CoreResult<()> {
        let mut cp = self.require(id).await?;
        if let Some(connector) = cp.connector_mut(evse_id) {
            if let Some(p) = power_w {
                connector.power_w = p;
            }
            if let Some(m) = meter_wh {
                connector.meter_wh = m;
            }
            connector.updated_at = Utc::now();
            cp.updated_at = Utc::now();
            self.chargers.save(cp).await?;
        } else {
            warn!(charge_point_id = id, evse_id, "Meter sample for unknown connector");
        }
        Ok(())
    }

    /// Mark a station offline after its session goes away.
    pub async fn mark_offline(&self, id: &str) -> CoreResult<()> {
        self.chargers
            .update_status(id, ConnectorStatus::Unavailable)
            .await
    }

    pub async fn find(&self, id: &str) -> CoreResult<Option<ChargePoint>> {
        self.chargers.find_by_id(id).await
    }

    async fn require(&self, id: &str) -> CoreResult<ChargePoint> {
        self.chargers
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::Repository(format!("charge point {} not found", id)))
    }
}
