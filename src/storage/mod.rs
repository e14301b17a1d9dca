pub mod engine;
pub mod memory;
pub mod persistence;

pub use engine::{LedgerStore, StorageResult};
pub use memory::InMemoryLedgerStore;
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry};
