use super::engine::{LedgerStore, StorageResult};
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use crate::core::{MileageLedger, Owner, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// In-process ledger store with optional WAL/snapshot durability.
pub struct InMemoryLedgerStore {
    /// One lock per record so readers of different owners never contend
    records: RwLock<HashMap<Owner, Arc<RwLock<MileageLedger>>>>,
    /// Serializes writers while durability is on, so log order == apply order
    persistence: Option<Arc<Mutex<PersistenceManager>>>,
    durability_mode: Option<DurabilityMode>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            persistence: None,
            durability_mode: None,
        }
    }

    /// Opens a durable store in `data_dir`, recovering whatever a previous
    /// process left there.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        durability_mode: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> StorageResult<Self> {
        let mut persistence = PersistenceManager::new(data_dir.as_ref(), durability_mode)?;
        persistence.wal_mut().set_checkpoint_threshold(checkpoint_threshold);
        let recovered = persistence.recover()?;

        tracing::info!(
            target: "mileage::storage",
            path = %data_dir.as_ref().display(),
            ledgers = recovered.len(),
            ?durability_mode,
            "Opened ledger store"
        );

        let records = recovered
            .into_iter()
            .map(|(owner, ledger)| (owner, Arc::new(RwLock::new(ledger))))
            .collect();

        Ok(Self {
            records: RwLock::new(records),
            persistence: Some(Arc::new(Mutex::new(persistence))),
            durability_mode: Some(durability_mode),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn durability_mode(&self) -> Option<DurabilityMode> {
        self.durability_mode
    }

    /// Writes a snapshot of every record and truncates the WAL.
    pub async fn checkpoint(&self) -> StorageResult<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let mut persistence = persistence.lock().await;
        let ledgers = self.collect().await;
        persistence.checkpoint(ledgers)
    }

    async fn writer(&self) -> Option<MutexGuard<'_, PersistenceManager>> {
        match &self.persistence {
            Some(persistence) => Some(persistence.lock().await),
            None => None,
        }
    }

    async fn collect(&self) -> Vec<MileageLedger> {
        let handles: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut ledgers = Vec::with_capacity(handles.len());
        for handle in handles {
            ledgers.push(handle.read().await.clone());
        }
        ledgers
    }

    /// Runs after the write is already logged and applied, so a failed
    /// checkpoint only leaves the WAL in place for the next attempt.
    async fn maybe_checkpoint(&self, writer: &mut Option<MutexGuard<'_, PersistenceManager>>) {
        if let Some(persistence) = writer.as_mut() {
            if persistence.needs_checkpoint() {
                let ledgers = self.collect().await;
                if let Err(e) = persistence.checkpoint(ledgers) {
                    tracing::warn!(
                        target: "mileage::storage",
                        error = %e,
                        "Automatic checkpoint failed, keeping WAL"
                    );
                }
            }
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_by_owner(&self, owner: &Owner) -> StorageResult<Option<MileageLedger>> {
        let handle = self.records.read().await.get(owner).cloned();
        match handle {
            Some(handle) => Ok(Some(handle.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn create(&self, ledger: MileageLedger) -> StorageResult<MileageLedger> {
        let mut writer = self.writer().await;
        {
            let mut records = self.records.write().await;
            if records.contains_key(ledger.owner()) {
                return Err(StorageError::Conflict(ledger.owner().clone()));
            }
            if let Some(persistence) = writer.as_mut() {
                persistence.log(&WalEntry::Create(ledger.clone()))?;
            }
            records.insert(ledger.owner().clone(), Arc::new(RwLock::new(ledger.clone())));
        }
        self.maybe_checkpoint(&mut writer).await;
        Ok(ledger)
    }

    async fn save(&self, ledger: MileageLedger) -> StorageResult<MileageLedger> {
        let mut writer = self.writer().await;
        if let Some(persistence) = writer.as_mut() {
            persistence.log(&WalEntry::Save(ledger.clone()))?;
        }
        let existing = self.records.read().await.get(ledger.owner()).cloned();
        match existing {
            Some(handle) => {
                *handle.write().await = ledger.clone();
            }
            None => {
                self.records
                    .write()
                    .await
                    .insert(ledger.owner().clone(), Arc::new(RwLock::new(ledger.clone())));
            }
        }
        self.maybe_checkpoint(&mut writer).await;
        Ok(ledger)
    }

    async fn find_all(&self) -> StorageResult<Vec<MileageLedger>> {
        Ok(self.collect().await)
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.records.read().await.len())
    }
}
