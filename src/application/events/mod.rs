//! Event publication on the bus port.

pub mod publisher;

pub use publisher::{EventPublisher, SharedEventPublisher};
