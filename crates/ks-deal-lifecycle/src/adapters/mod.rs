//! # Adapters
//!
//! Implementations of the outbound ports: two document stores (in-memory
//! for tests and dev, RocksDB for production), the cached price oracle, a
//! deterministic simulated TRON chain and the notification adapters.

pub mod memory;
pub mod notifier;
pub mod price_oracle;
pub mod rocksdb_store;
pub mod tron;

pub use memory::MemoryStore;
pub use notifier::{RecordingNotifier, TracingNotifier};
pub use price_oracle::{CachedPriceOracle, HttpRateSource, RateSource, StaticRateSource};
pub use rocksdb_store::{RocksDbConfig, RocksDbStore};
pub use tron::{PayoutRecord, SimulatedTron};
