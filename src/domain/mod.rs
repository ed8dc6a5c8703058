//! Core business entities, status enums, events, and collaborator ports.

pub mod charge_point;
pub mod charging_profile;
pub mod error;
pub mod events;
pub mod firmware;
pub mod ports;
pub mod transaction;
pub mod user;
pub mod v2g;
pub mod version;

pub use charge_point::{ChargePoint, Connector, ConnectorStatus};
pub use charging_profile::{
    ChargingProfile, ChargingSchedule, ProfileKind, ProfilePurpose, SchedulePeriod,
};
pub use error::{CallFault, CoreError, CoreResult, OcppErrorCode};
pub use events::{DomainEvent, EventEnvelope};
pub use firmware::{FirmwareJob, FirmwareJobStatus};
pub use ports::{
    BusMessage, Cache, ChargerFilter, ChargerRepo, EventBus, PriceSlot, PricingOracle,
    TransactionRepo, UserRepo,
};
pub use transaction::{Transaction, TransactionStatus};
pub use user::User;
pub use v2g::{EnergyTransferMode, PowerDirection, V2gCapability, V2gSession};
pub use version::OcppVersion;
