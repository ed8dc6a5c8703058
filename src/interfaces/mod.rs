//! Delivery mechanisms. The OCPP WebSocket endpoint lives here; REST and
//! other operator surfaces are separate services consuming the same
//! application layer.

pub mod ws;
