//! # GridLink CSMS
//!
//! OCPP 2.0.1 central system (with 1.6 fallback) for managing EV charging
//! stations over persistent WebSocket sessions: session layer, command
//! correlation, transaction lifecycle, charging-profile/V2G engine, and
//! firmware workflow.
//!
//! ## Architecture
//!
//! - **support**: Cross-cutting utilities (OCPP-J framing, shutdown)
//! - **domain**: Entities, status enums, error kinds, collaborator ports
//! - **application**: Sessions, dispatch, command API, engines, events
//! - **infrastructure**: In-memory ports, tariff oracle, TLS loading
//! - **interfaces**: The OCPP WebSocket endpoint
//! - **config**: Application configuration (TOML-based)

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod support;

// Re-export commonly used types at crate root
pub use application::commands::{CommandService, SharedCommandService};
pub use application::events::{EventPublisher, SharedEventPublisher};
pub use application::handlers::{Dispatcher, HandlerContext, SharedDispatcher};
pub use application::session::{Session, SessionConfig, SessionRegistry, SharedSessionRegistry};
pub use config::{default_config_path, AppConfig};
pub use interfaces::ws::OcppServer;
pub use support::ocpp_frame::OcppFrame;
