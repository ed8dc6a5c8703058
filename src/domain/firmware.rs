//! Firmware update job tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status timeline of a firmware update:
/// Idle → Downloading → Downloaded → Installing → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareJobStatus {
    Idle,
    Downloading,
    Downloaded,
    DownloadFailed,
    Installing,
    Installed,
    InstallationFailed,
    InvalidSignature,
    RevokedCertificate,
}

impl FirmwareJobStatus {
    /// Terminal states. A new update may replace the job only once it has
    /// reached one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Installed
                | Self::InstallationFailed
                | Self::DownloadFailed
                | Self::InvalidSignature
                | Self::RevokedCertificate
        )
    }
}

/// One firmware update tracked per charge point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareJob {
    pub request_id: i32,
    pub charge_point_id: String,
    pub location: String,
    pub retrieve_date: DateTime<Utc>,
    pub retries: Option<i32>,
    pub retry_interval_s: Option<i32>,
    pub status: FirmwareJobStatus,
    /// Observed status transitions, oldest first.
    pub timeline: Vec<(FirmwareJobStatus, DateTime<Utc>)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FirmwareJob {
    pub fn new(
        request_id: i32,
        charge_point_id: impl Into<String>,
        location: impl Into<String>,
        retrieve_date: DateTime<Utc>,
        retries: Option<i32>,
        retry_interval_s: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            charge_point_id: charge_point_id.into(),
            location: location.into(),
            retrieve_date,
            retries,
            retry_interval_s,
            status: FirmwareJobStatus::Idle,
            timeline: vec![(FirmwareJobStatus::Idle, now)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a status notification from the charger.
    pub fn advance(&mut self, status: FirmwareJobStatus) {
        let now = Utc::now();
        self.status = status;
        self.timeline.push((status, now));
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_advances_to_terminal() {
        let mut job = FirmwareJob::new(1, "CP001", "https://fw.example/1.bin", Utc::now(), Some(3), Some(60));
        assert!(!job.is_terminal());

        job.advance(FirmwareJobStatus::Downloading);
        job.advance(FirmwareJobStatus::Downloaded);
        job.advance(FirmwareJobStatus::Installing);
        assert!(!job.is_terminal());

        job.advance(FirmwareJobStatus::Installed);
        assert!(job.is_terminal());
        assert_eq!(job.timeline.len(), 5);
    }

    #[test]
    fn failure_states_are_terminal() {
        for status in [
            FirmwareJobStatus::InstallationFailed,
            FirmwareJobStatus::InvalidSignature,
            FirmwareJobStatus::RevokedCertificate,
            FirmwareJobStatus::DownloadFailed,
        ] {
            assert!(status.is_terminal(), "{status:?}");
        }
        assert!(!FirmwareJobStatus::Downloading.is_terminal());
    }
}
