//! WebSocket delivery: admission, subprotocol negotiation, the server.

pub mod admission;
pub mod negotiator;
pub mod ocpp_server;

pub use admission::{Admission, AdmissionControl, AdmissionError, SecurityConfig};
pub use negotiator::ProtocolNegotiator;
pub use ocpp_server::OcppServer;
