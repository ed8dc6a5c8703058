//! Session layer: live connections, pending-call correlation, registry.

pub mod connection;
pub mod pending;
pub mod registry;

pub use connection::{OutboundFrame, Session, SessionConfig};
pub use pending::{CallOutcome, PendingCallTable};
pub use registry::{RegisterOutcome, SessionRegistry, SharedSessionRegistry};
