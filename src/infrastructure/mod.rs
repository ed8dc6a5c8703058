//! Infrastructure adapters: in-memory ports, tariff oracle, TLS loading.

pub mod bus;
pub mod memory_cache;
pub mod memory_repos;
pub mod tariff_oracle;
pub mod tls;

pub use bus::BroadcastBus;
pub use memory_cache::MemoryCache;
pub use memory_repos::{MemoryChargerRepo, MemoryTransactionRepo, MemoryUserRepo};
pub use tariff_oracle::TariffOracle;
pub use tls::{build_acceptor, TlsSettings};
