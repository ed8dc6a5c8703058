//! Inbound message dispatch.
//!
//! One dispatcher per process, stateless apart from its two handler
//! registries (one per protocol version). Handlers are keyed by action
//! name and treated uniformly; the reader loop awaits each dispatch, so
//! within a session Calls are handled and replied strictly in the order
//! the frames were read.

pub mod ocpp_v16;
pub mod ocpp_v201;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::application::events::SharedEventPublisher;
use crate::application::services::{
    SharedAuthorizationService, SharedChargePointService, SharedFirmwareManager,
    SharedTransactionEngine, SharedV2gEngine,
};
use crate::application::session::Session;
use crate::domain::{CallFault, OcppErrorCode, OcppVersion};
use crate::support::ocpp_frame::OcppFrame;

/// One inbound-Call handler. Long work is queued behind the engines; the
/// handler itself must come back quickly so the session reader keeps
/// draining frames.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, session: &Session, payload: Value) -> Result<Value, CallFault>;
}

/// Registry mapping action names to handlers for one protocol version.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<&'static str, Arc<dyn ActionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: &'static str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action, handler);
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action)
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// Shared dependencies of the handler set.
pub struct HandlerContext {
    pub charge_points: SharedChargePointService,
    pub transactions: SharedTransactionEngine,
    pub authorization: SharedAuthorizationService,
    pub v2g: SharedV2gEngine,
    pub firmware: SharedFirmwareManager,
    pub publisher: SharedEventPublisher,
    /// Interval advertised to stations at boot, seconds.
    pub heartbeat_interval_s: u64,
}

/// Routes decoded frames: Calls to the per-action handlers, results and
/// errors to the owning session's pending-call table.
pub struct Dispatcher {
    v201: HandlerTable,
    v16: HandlerTable,
}

pub type SharedDispatcher = Arc<Dispatcher>;

impl Dispatcher {
    pub fn new(context: Arc<HandlerContext>) -> SharedDispatcher {
        let v201 = ocpp_v201::handler_table(context.clone());
        let v16 = ocpp_v16::handler_table(context);
        Arc::new(Self { v201, v16 })
    }

    /// Construct with explicit tables (tests).
    pub fn with_tables(v201: HandlerTable, v16: HandlerTable) -> SharedDispatcher {
        Arc::new(Self { v201, v16 })
    }

    pub async fn dispatch(&self, session: &Arc<Session>, frame: OcppFrame) {
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                metrics::counter!("ocpp_messages_in_total", "action" => action.clone())
                    .increment(1);

                let table = match session.ocpp_version() {
                    OcppVersion::V201 => &self.v201,
                    OcppVersion::V16 => &self.v16,
                };

                match table.get(&action) {
                    Some(handler) => {
                        match handler.handle(session, payload).await {
                            Ok(result) => session.reply(&unique_id, result),
                            Err(fault) => {
                                warn!(
                                    charge_point_id = session.charge_point_id(),
                                    action = action.as_str(),
                                    code = fault.code.as_str(),
                                    description = fault.description.as_str(),
                                    "Handler fault"
                                );
                                session.reply_error(&unique_id, fault.code, &fault.description);
                            }
                        }
                    }
                    None => {
                        info!(
                            charge_point_id = session.charge_point_id(),
                            action = action.as_str(),
                            "No handler for action"
                        );
                        session.reply_error(
                            &unique_id,
                            OcppErrorCode::NotImplemented,
                            &format!("Action {} is not supported", action),
                        );
                    }
                }
            }

            OcppFrame::CallResult { unique_id, payload } => {
                metrics::counter!("ocpp_messages_in_total", "action" => "CallResult")
                    .increment(1);
                if !session.resolve_result(&unique_id, payload) {
                    // Late arrival after timeout or abandonment.
                    warn!(
                        charge_point_id = session.charge_point_id(),
                        message_id = unique_id.as_str(),
                        "CallResult for unknown message id — discarded"
                    );
                }
            }

            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                metrics::counter!("ocpp_messages_in_total", "action" => "CallError").increment(1);
                if !session.resolve_error(&unique_id, error_code, error_description, error_details)
                {
                    warn!(
                        charge_point_id = session.charge_point_id(),
                        message_id = unique_id.as_str(),
                        "CallError for unknown message id — discarded"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::{OutboundFrame, SessionConfig};
    use tokio::sync::mpsc;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(&self, _session: &Session, payload: Value) -> Result<Value, CallFault> {
            Ok(payload)
        }
    }

    fn session_pair() -> (Arc<Session>, mpsc::UnboundedReceiver<OutboundFrame>) {
        Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:1",
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn unknown_action_yields_not_implemented() {
        let dispatcher = Dispatcher::with_tables(HandlerTable::new(), HandlerTable::new());
        let (session, mut rx) = session_pair();

        dispatcher
            .dispatch(
                &session,
                OcppFrame::Call {
                    unique_id: "m1".into(),
                    action: "MadeUpAction".into(),
                    payload: serde_json::json!({}),
                },
            )
            .await;

        let frame = rx.recv().await.unwrap();
        let parsed = OcppFrame::parse(frame.text()).unwrap();
        match parsed {
            OcppFrame::CallError {
                unique_id,
                error_code,
                ..
            } => {
                assert_eq!(unique_id, "m1");
                assert_eq!(error_code, "NotImplemented");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
        // The session is still up.
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn registered_handler_gets_call_and_reply_is_sent() {
        let mut v201 = HandlerTable::new();
        v201.register("Echo", Arc::new(Echo));
        let dispatcher = Dispatcher::with_tables(v201, HandlerTable::new());
        let (session, mut rx) = session_pair();

        dispatcher
            .dispatch(
                &session,
                OcppFrame::Call {
                    unique_id: "m2".into(),
                    action: "Echo".into(),
                    payload: serde_json::json!({"x": 1}),
                },
            )
            .await;

        let frame = rx.recv().await.unwrap();
        let parsed = OcppFrame::parse(frame.text()).unwrap();
        match parsed {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "m2");
                assert_eq!(payload["x"], 1);
            }
            other => panic!("expected CallResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn boot_and_transaction_started_flow() {
        use crate::application::commands::CommandService;
        use crate::application::events::EventPublisher;
        use crate::application::services::{
            AuthorizationService, ChargePointService, FirmwareManager, PricingConfig,
            ProfileLedger, TransactionEngine, V2gConfig, V2gEngine,
        };
        use crate::application::session::SessionRegistry;
        use crate::domain::{ConnectorStatus, TransactionRepo, User};
        use crate::infrastructure::bus::BroadcastBus;
        use crate::infrastructure::memory_cache::MemoryCache;
        use crate::infrastructure::memory_repos::{
            MemoryChargerRepo, MemoryTransactionRepo, MemoryUserRepo,
        };
        use crate::infrastructure::tariff_oracle::TariffOracle;

        let chargers = MemoryChargerRepo::shared();
        let transactions = MemoryTransactionRepo::shared();
        let bus = BroadcastBus::shared();
        let mut started_rx = bus
            .subscribe_messages(crate::domain::events::topics::TRANSACTION_STARTED)
            .await;
        let publisher = EventPublisher::new(bus);
        let charge_points = ChargePointService::new(chargers.clone());
        let authorization = AuthorizationService::new(
            Arc::new(MemoryUserRepo::with_users(vec![User::new(
                "U1",
                "u1@example.com",
                "User One",
            )])),
            MemoryCache::shared(),
            std::time::Duration::from_secs(60),
        );
        let profiles = Arc::new(ProfileLedger::new());
        let registry = SessionRegistry::shared(0);
        let commands = CommandService::new(registry);
        let transaction_engine = TransactionEngine::new(
            transactions.clone(),
            charge_points.clone(),
            authorization.clone(),
            publisher.clone(),
            profiles.clone(),
            PricingConfig::default(),
        );
        let v2g = V2gEngine::new(
            V2gConfig::default(),
            commands.clone(),
            chargers,
            Arc::new(TariffOracle::new(PricingConfig::default())),
            publisher.clone(),
            profiles,
        );
        let firmware = FirmwareManager::new(commands, publisher.clone());

        let dispatcher = Dispatcher::new(Arc::new(HandlerContext {
            charge_points: charge_points.clone(),
            transactions: transaction_engine,
            authorization,
            v2g,
            firmware,
            publisher,
            heartbeat_interval_s: 300,
        }));

        let (session, mut rx) = session_pair();

        // Boot first.
        dispatcher
            .dispatch(
                &session,
                OcppFrame::Call {
                    unique_id: "b1".into(),
                    action: "BootNotification".into(),
                    payload: serde_json::json!({
                        "chargingStation": {"vendorName": "ACME", "model": "X1"},
                        "reason": "PowerUp"
                    }),
                },
            )
            .await;
        let boot_reply = OcppFrame::parse(rx.recv().await.unwrap().text()).unwrap();
        match boot_reply {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "b1");
                assert_eq!(payload["status"], "Accepted");
                assert_eq!(payload["interval"], 300);
            }
            other => panic!("expected CallResult, got {other:?}"),
        }
        assert_eq!(session.heartbeat_interval_s(), 300);

        // The charger opens the transaction it was asked to start.
        dispatcher
            .dispatch(
                &session,
                OcppFrame::Call {
                    unique_id: "t1".into(),
                    action: "TransactionEvent".into(),
                    payload: serde_json::json!({
                        "eventType": "Started",
                        "timestamp": "2025-06-15T10:00:00Z",
                        "triggerReason": "Authorized",
                        "seqNo": 0,
                        "transactionInfo": {"transactionId": "TX-123"},
                        "evse": {"id": 1},
                        "idToken": {"idToken": "U1", "type": "ISO14443"}
                    }),
                },
            )
            .await;
        let tx_reply = OcppFrame::parse(rx.recv().await.unwrap().text()).unwrap();
        match tx_reply {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "t1");
                assert_eq!(payload["idTokenInfo"]["status"], "Accepted");
            }
            other => panic!("expected CallResult, got {other:?}"),
        }

        let tx = transactions
            .find_by_ocpp_id("CP001", "TX-123")
            .await
            .unwrap()
            .expect("transaction opened");
        assert_eq!(tx.user_id.as_deref(), Some("U1"));

        let cp = charge_points.find("CP001").await.unwrap().unwrap();
        assert_eq!(cp.status, ConnectorStatus::Occupied);

        assert!(started_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn call_result_routes_to_pending_table() {
        let dispatcher = Dispatcher::with_tables(HandlerTable::new(), HandlerTable::new());
        let (session, mut rx) = session_pair();

        let s = session.clone();
        let call = tokio::spawn(async move {
            s.call("Reset", serde_json::json!({}), None).await
        });
        let frame = rx.recv().await.unwrap();
        let id = OcppFrame::parse(frame.text()).unwrap().unique_id().to_string();

        dispatcher
            .dispatch(
                &session,
                OcppFrame::CallResult {
                    unique_id: id,
                    payload: serde_json::json!({"status":"Accepted"}),
                },
            )
            .await;

        assert_eq!(call.await.unwrap().unwrap()["status"], "Accepted");
    }
}
