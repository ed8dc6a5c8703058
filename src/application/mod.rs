//! Use-case orchestration: sessions, dispatch, commands, engines, events.

pub mod commands;
pub mod events;
pub mod handlers;
pub mod services;
pub mod session;
