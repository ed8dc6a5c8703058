//! Cross-cutting utilities: OCPP-J framing and graceful shutdown.

pub mod ocpp_frame;
pub mod shutdown;

pub use ocpp_frame::{OcppFrame, OcppFrameError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
