use crate::core::{MileageLedger, Owner, StorageError};
use async_trait::async_trait;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Ledger store trait - allows pluggable persistence backends
///
/// Every call operates on whole records: `save` replaces the stored ledger in
/// a single step, so all fields written together become durable together.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up the ledger belonging to `owner`
    async fn find_by_owner(&self, owner: &Owner) -> StorageResult<Option<MileageLedger>>;

    /// Insert a new ledger; fails with `Conflict` if the owner already has one
    async fn create(&self, ledger: MileageLedger) -> StorageResult<MileageLedger>;

    /// Insert or replace the ledger for its owner
    async fn save(&self, ledger: MileageLedger) -> StorageResult<MileageLedger>;

    /// All ledgers, in no particular order
    async fn find_all(&self) -> StorageResult<Vec<MileageLedger>>;

    /// Number of stored ledgers
    async fn len(&self) -> StorageResult<usize> {
        Ok(self.find_all().await?.len())
    }
}
