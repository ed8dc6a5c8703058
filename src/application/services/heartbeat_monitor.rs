//! Heartbeat watchdog.
//!
//! Closes sessions whose inactivity exceeds twice the heartbeat interval
//! negotiated at boot, and marks the stations offline.

use std::time::Duration;

use tracing::{info, warn};

use crate::application::session::SharedSessionRegistry;
use crate::support::shutdown::ShutdownSignal;

use super::charge_point::SharedChargePointService;

/// Inactivity allowance as a multiple of the negotiated interval.
const HEARTBEAT_MISS_FACTOR: u64 = 2;

pub struct HeartbeatWatchdog {
    registry: SharedSessionRegistry,
    charge_points: SharedChargePointService,
    check_interval: Duration,
}

impl HeartbeatWatchdog {
    pub fn new(
        registry: SharedSessionRegistry,
        charge_points: SharedChargePointService,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            charge_points,
            check_interval,
        }
    }

    /// Spawn the watchdog loop.
    pub fn start(self, shutdown: ShutdownSignal) {
        tokio::spawn(async move {
            info!(
                check_interval_s = self.check_interval.as_secs(),
                "Heartbeat watchdog started"
            );
            let mut ticker = tokio::time::interval(self.check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Heartbeat watchdog shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Close every session whose idle time exceeds its allowance.
    pub async fn sweep(&self) {
        for session in self.registry.sessions() {
            let allowed = (session.heartbeat_interval_s() * HEARTBEAT_MISS_FACTOR) as i64;
            let idle = session.idle_seconds();
            if idle <= allowed {
                continue;
            }

            warn!(
                charge_point_id = session.charge_point_id(),
                idle_seconds = idle,
                allowed_seconds = allowed,
                "Heartbeat missed — closing session"
            );
            metrics::counter!("ocpp_heartbeat_evictions_total").increment(1);

            session.close("heartbeat missed");
            self.registry.unregister(&session);

            if let Err(e) = self
                .charge_points
                .mark_offline(session.charge_point_id())
                .await
            {
                warn!(
                    charge_point_id = session.charge_point_id(),
                    error = %e,
                    "Failed to mark charge point offline"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::charge_point::ChargePointService;
    use crate::application::session::{Session, SessionConfig, SessionRegistry};
    use crate::domain::OcppVersion;
    use crate::infrastructure::memory_repos::MemoryChargerRepo;
    use std::sync::Arc;

    #[tokio::test]
    async fn sweep_closes_only_stale_sessions() {
        let registry = SessionRegistry::shared(0);
        let chargers = Arc::new(MemoryChargerRepo::new());
        let charge_points = ChargePointService::new(chargers);
        charge_points
            .register_or_update("CP-STALE", "ACME", "X1", None, None)
            .await
            .unwrap();
        charge_points
            .register_or_update("CP-FRESH", "ACME", "X1", None, None)
            .await
            .unwrap();

        // Interval 0 → any inactivity is a miss.
        let (stale, _rx1) = Session::new(
            "CP-STALE",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig {
                heartbeat_interval_s: 0,
                ..SessionConfig::default()
            },
        );
        let (fresh, _rx2) = Session::new(
            "CP-FRESH",
            OcppVersion::V201,
            "127.0.0.1:2",
            SessionConfig::default(),
        );
        registry.register(stale.clone());
        registry.register(fresh.clone());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let watchdog = HeartbeatWatchdog::new(
            registry.clone(),
            charge_points,
            Duration::from_secs(60),
        );
        watchdog.sweep().await;

        assert!(stale.is_closed());
        assert!(!registry.is_connected("CP-STALE"));
        assert!(!fresh.is_closed());
        assert!(registry.is_connected("CP-FRESH"));
    }
}
