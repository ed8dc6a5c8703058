//! Firmware update workflow.
//!
//! One active job per charge point. UpdateFirmware assigns a request id
//! and stores the job; each FirmwareStatusNotification advances its
//! timeline. A new update replaces the prior job only once it is terminal.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::application::commands::{update_firmware, SharedCommandService};
use crate::application::events::SharedEventPublisher;
use crate::domain::{CoreError, CoreResult, DomainEvent, FirmwareJob, FirmwareJobStatus};

pub struct FirmwareManager {
    commands: SharedCommandService,
    publisher: SharedEventPublisher,
    jobs: DashMap<String, FirmwareJob>,
    request_ids: AtomicI32,
}

pub type SharedFirmwareManager = Arc<FirmwareManager>;

impl FirmwareManager {
    pub fn new(
        commands: SharedCommandService,
        publisher: SharedEventPublisher,
    ) -> SharedFirmwareManager {
        Arc::new(Self {
            commands,
            publisher,
            jobs: DashMap::new(),
            request_ids: AtomicI32::new(1),
        })
    }

    /// Start a firmware update. Fails with `JobInFlight` while a prior job
    /// is still running.
    pub async fn start_update(
        &self,
        charge_point_id: &str,
        location: &str,
        retrieve_date: Option<DateTime<Utc>>,
        retries: Option<i32>,
        retry_interval_s: Option<i32>,
    ) -> CoreResult<(i32, String)> {
        if let Some(job) = self.jobs.get(charge_point_id) {
            if !job.is_terminal() {
                return Err(CoreError::JobInFlight(job.request_id));
            }
        }

        let request_id = self.request_ids.fetch_add(1, Ordering::SeqCst);
        let retrieve_date = retrieve_date.unwrap_or_else(Utc::now);

        let status = update_firmware(
            &self.commands,
            charge_point_id,
            location,
            retrieve_date,
            request_id,
            retries,
            retry_interval_s,
        )
        .await?;

        if status == "Accepted" {
            self.jobs.insert(
                charge_point_id.to_string(),
                FirmwareJob::new(
                    request_id,
                    charge_point_id,
                    location,
                    retrieve_date,
                    retries,
                    retry_interval_s,
                ),
            );
            info!(charge_point_id, request_id, location, "Firmware job started");
        } else {
            warn!(charge_point_id, request_id, status, "Firmware update refused");
        }

        Ok((request_id, status))
    }

    /// Advance the job from a FirmwareStatusNotification.
    pub async fn on_status(
        &self,
        charge_point_id: &str,
        wire_status: &str,
        request_id: Option<i32>,
    ) {
        let Some(status) = map_wire_status(wire_status) else {
            warn!(charge_point_id, wire_status, "Unknown firmware status");
            return;
        };

        match self.jobs.get_mut(charge_point_id) {
            Some(mut job) => {
                if let Some(id) = request_id {
                    if id != job.request_id {
                        warn!(
                            charge_point_id,
                            reported = id,
                            tracked = job.request_id,
                            "Firmware status for a different request"
                        );
                    }
                }
                job.advance(status);
                info!(
                    charge_point_id,
                    request_id = job.request_id,
                    status = ?status,
                    terminal = job.is_terminal(),
                    "Firmware job advanced"
                );
            }
            None => {
                // Status without a tracked job: the station may be finishing
                // an update started before we restarted.
                info!(charge_point_id, status = ?status, "Untracked firmware status");
            }
        }

        metrics::counter!("ocpp_firmware_status_total", "status" => wire_status.to_string())
            .increment(1);

        self.publisher
            .publish(DomainEvent::FirmwareStatusChanged {
                charge_point_id: charge_point_id.to_string(),
                request_id,
                status: wire_status.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    pub fn job(&self, charge_point_id: &str) -> Option<FirmwareJob> {
        self.jobs.get(charge_point_id).map(|j| j.clone())
    }
}

/// Fold the wire status set onto the job timeline.
fn map_wire_status(status: &str) -> Option<FirmwareJobStatus> {
    let mapped = match status {
        "Idle" => FirmwareJobStatus::Idle,
        "Downloading" | "DownloadScheduled" | "DownloadPaused" => FirmwareJobStatus::Downloading,
        "Downloaded" | "SignatureVerified" => FirmwareJobStatus::Downloaded,
        "DownloadFailed" => FirmwareJobStatus::DownloadFailed,
        "Installing" | "InstallRebooting" | "InstallScheduled" => FirmwareJobStatus::Installing,
        "Installed" => FirmwareJobStatus::Installed,
        "InstallationFailed" | "InstallVerificationFailed" => {
            FirmwareJobStatus::InstallationFailed
        }
        "InvalidSignature" => FirmwareJobStatus::InvalidSignature,
        "RevokedCertificate" => FirmwareJobStatus::RevokedCertificate,
        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::CommandService;
    use crate::application::events::EventPublisher;
    use crate::application::session::{Session, SessionConfig, SessionRegistry, SharedSessionRegistry};
    use crate::domain::OcppVersion;
    use crate::infrastructure::bus::BroadcastBus;
    use crate::support::ocpp_frame::OcppFrame;

    fn manager() -> (SharedFirmwareManager, SharedSessionRegistry) {
        let registry = SessionRegistry::shared(0);
        let commands = CommandService::new(registry.clone());
        let publisher = EventPublisher::new(BroadcastBus::shared());
        (FirmwareManager::new(commands, publisher), registry)
    }

    /// Answer the next Call on `rx` with an Accepted status.
    fn accept_next(
        session: std::sync::Arc<Session>,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<crate::application::session::OutboundFrame>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let parsed = OcppFrame::parse(frame.text()).unwrap();
            session.resolve_result(parsed.unique_id(), serde_json::json!({"status":"Accepted"}));
        })
    }

    #[tokio::test]
    async fn second_update_while_job_active_is_rejected() {
        let (manager, registry) = manager();
        let (session, rx) = Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        );
        registry.register(session.clone());
        let responder = accept_next(session.clone(), rx);

        let (request_id, status) = manager
            .start_update("CP001", "https://fw.example/2.bin", None, Some(3), Some(60))
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(status, "Accepted");

        // Job is in flight (Idle, not terminal), so replacement is refused.
        let err = manager
            .start_update("CP001", "https://fw.example/3.bin", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JobInFlight(id) if id == request_id));
    }

    #[tokio::test]
    async fn terminal_job_can_be_replaced() {
        let (manager, registry) = manager();
        let (session, rx) = Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        );
        registry.register(session.clone());
        let responder = accept_next(session.clone(), rx);

        manager
            .start_update("CP001", "https://fw.example/2.bin", None, None, None)
            .await
            .unwrap();
        responder.await.unwrap();

        for status in ["Downloading", "Downloaded", "Installing", "Installed"] {
            manager.on_status("CP001", status, None).await;
        }
        assert!(manager.job("CP001").unwrap().is_terminal());

        // New session channel for the second command.
        let (session2, rx2) = Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        );
        registry.register(session2.clone());
        let responder = accept_next(session2, rx2);

        let (request_id, status) = manager
            .start_update("CP001", "https://fw.example/3.bin", None, None, None)
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(status, "Accepted");
        assert_eq!(manager.job("CP001").unwrap().request_id, request_id);
    }
}
