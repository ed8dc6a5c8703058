//! Use-case engines: transactions, pricing, V2G, firmware, watchdogs.

pub mod authorization;
pub mod charge_point;
pub mod discharge_optimizer;
pub mod firmware_manager;
pub mod heartbeat_monitor;
pub mod pricing;
pub mod profile_ledger;
pub mod transaction_engine;
pub mod v2g_engine;

pub use authorization::{AuthorizationService, AuthorizationStatus, SharedAuthorizationService};
pub use charge_point::{ChargePointService, SharedChargePointService};
pub use discharge_optimizer::{best_discharge_window, DischargeConstraints, DischargeWindow};
pub use firmware_manager::{FirmwareManager, SharedFirmwareManager};
pub use heartbeat_monitor::HeartbeatWatchdog;
pub use pricing::{session_cost, CostBreakdown, PricingConfig};
pub use profile_ledger::ProfileLedger;
pub use transaction_engine::{SharedTransactionEngine, TransactionEngine, TxEventData};
pub use v2g_engine::{
    DischargeDecision, RebalanceOutcome, SharedV2gEngine, V2gConfig, V2gEngine,
};
