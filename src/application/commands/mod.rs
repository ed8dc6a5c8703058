//! Operator-facing command API.
//!
//! Each operator action synthesizes a fresh message id, registers a
//! pending-call entry with a deadline, enqueues the Call on the target
//! session's writer and awaits exactly one of {CallResult, CallError,
//! Timeout, SessionClosed}. A charger that is not in the registry yields
//! `NotConnected` without any wire traffic. No retries at this layer.

pub mod change_availability;
pub mod clear_charging_profile;
pub mod get_charging_profiles;
pub mod get_log;
pub mod get_variables;
pub mod request_start;
pub mod request_stop;
pub mod reset;
pub mod set_charging_profile;
pub mod set_variables;
pub mod trigger_message;
pub mod unlock_connector;
pub mod update_firmware;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::application::session::SharedSessionRegistry;
use crate::domain::{CoreError, CoreResult};

pub use change_availability::{change_availability, Availability};
pub use clear_charging_profile::{clear_charging_profile, ClearChargingProfileCriteria};
pub use get_charging_profiles::{get_charging_profiles, GetChargingProfilesCriteria};
pub use get_log::{get_log, GetLogResult};
pub use get_variables::{get_variables, GetVariablesResult, VariableResult};
pub use request_start::{request_start_transaction, RemoteStartOutcome};
pub use request_stop::request_stop_transaction;
pub use reset::{reset, ResetKind};
pub use set_charging_profile::set_charging_profile;
pub use set_variables::{set_variables, SetVariableStatus, SetVariablesResult};
pub use trigger_message::{trigger_message, TriggerType};
pub use unlock_connector::unlock_connector;
pub use update_firmware::update_firmware;

/// Routes operator Calls to the owning session.
pub struct CommandService {
    registry: SharedSessionRegistry,
}

pub type SharedCommandService = Arc<CommandService>;

impl CommandService {
    pub fn new(registry: SharedSessionRegistry) -> SharedCommandService {
        Arc::new(Self { registry })
    }

    /// Send a Call to a charge point with the session's default deadline.
    pub async fn send(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
    ) -> CoreResult<Value> {
        self.send_with_timeout(charge_point_id, action, payload, None)
            .await
    }

    /// Send a Call with an explicit deadline.
    pub async fn send_with_timeout(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> CoreResult<Value> {
        let session = self
            .registry
            .lookup(charge_point_id)
            .ok_or_else(|| CoreError::NotConnected(charge_point_id.to_string()))?;

        debug!(charge_point_id, action, "Dispatching operator command");
        session.call(action, payload, timeout).await
    }

    pub fn registry(&self) -> &SharedSessionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::{Session, SessionConfig, SessionRegistry};
    use crate::domain::OcppVersion;

    #[tokio::test]
    async fn command_to_absent_charger_is_not_connected() {
        let registry = SessionRegistry::shared(0);
        let commands = CommandService::new(registry);

        let err = commands
            .send("CP404", "Reset", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected(id) if id == "CP404"));
    }

    #[tokio::test]
    async fn command_rides_the_session_call_path() {
        let registry = SessionRegistry::shared(0);
        let (session, mut rx) = Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        );
        registry.register(session.clone());
        let commands = CommandService::new(registry);

        let task = tokio::spawn({
            let commands = commands.clone();
            async move {
                commands
                    .send("CP001", "Reset", serde_json::json!({"type":"Immediate"}))
                    .await
            }
        });

        let frame = rx.recv().await.unwrap();
        let parsed = crate::support::ocpp_frame::OcppFrame::parse(frame.text()).unwrap();
        session.resolve_result(parsed.unique_id(), serde_json::json!({"status":"Accepted"}));

        let result = task.await.unwrap().unwrap();
        assert_eq!(result["status"], "Accepted");
    }
}
