//! Write-Ahead Logging (WAL) and snapshot persistence for ledger records

use crate::core::{MileageLedger, Owner, StorageError};
use crate::storage::engine::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const WAL_FILE_NAME: &str = "mileage.wal";
const SNAPSHOT_FILE_NAME: &str = "mileage.snapshot";
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Write-Ahead Log entry types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Create(MileageLedger),
    Save(MileageLedger),
}

impl WalEntry {
    pub fn ledger(&self) -> &MileageLedger {
        match self {
            Self::Create(ledger) | Self::Save(ledger) => ledger,
        }
    }

    fn into_ledger(self) -> MileageLedger {
        match self {
            Self::Create(ledger) | Self::Save(ledger) => ledger,
        }
    }
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub ledgers: Vec<MileageLedger>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub ledger_count: usize,
}

impl StoreSnapshot {
    pub fn new(ledgers: Vec<MileageLedger>) -> Self {
        let ledger_count = ledgers.len();
        Self {
            version: SNAPSHOT_VERSION,
            ledgers,
            metadata: SnapshotMetadata { created_at: Utc::now(), ledger_count },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync after every WAL append
    Sync,
    /// flush to the OS after every WAL append
    #[default]
    Async,
    /// keep nothing on disk
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> StorageResult<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> StorageResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| StorageError::Unavailable("WAL file not initialized".to_string()))?;
        let serialized = rmp_serde::to_vec(entry)?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| StorageError::Encode("WAL entry exceeds 4 GiB".to_string()))?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&serialized)?;
        file.flush()?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut().sync_all()?;
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Reads every complete entry. A torn final record (crash mid-append) is
    /// ignored.
    pub fn read_all(&self) -> StorageResult<Vec<WalEntry>> {
        Ok(self.read_complete()?.0)
    }

    /// Reads every complete entry and cuts a torn final record off the file,
    /// so later appends follow the last good record.
    pub fn recover(&mut self) -> StorageResult<Vec<WalEntry>> {
        let (entries, valid_len) = self.read_complete()?;
        if self.durability_mode == DurabilityMode::None || !self.wal_path.exists() {
            return Ok(entries);
        }

        let file_len = fs::metadata(&self.wal_path)?.len();
        if file_len > valid_len {
            tracing::warn!(
                target: "mileage::storage",
                path = %self.wal_path.display(),
                dropped_bytes = file_len - valid_len,
                "Truncating torn WAL tail"
            );
            self.wal_file = None;
            let file = OpenOptions::new().write(true).open(&self.wal_path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            drop(file);
            let file = OpenOptions::new().append(true).open(&self.wal_path)?;
            self.wal_file = Some(BufWriter::new(file));
        }
        Ok(entries)
    }

    /// Complete entries plus the byte length they occupy.
    fn read_complete(&self) -> StorageResult<(Vec<WalEntry>, u64)> {
        if !self.wal_path.exists() {
            return Ok((Vec::new(), 0));
        }
        let file = File::open(&self.wal_path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len: u64 = 0;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        target: "mileage::storage",
                        path = %self.wal_path.display(),
                        "Ignoring truncated WAL record"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            entries.push(rmp_serde::from_slice(&data)?);
            valid_len += 4 + len as u64;
        }
        Ok((entries, valid_len))
    }

    pub fn clear(&mut self) -> StorageResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new().write(true).truncate(true).open(&self.wal_path)?;
        drop(file);
        let file = OpenOptions::new().append(true).open(&self.wal_path)?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes to a temp file in the same directory, syncs it, then renames it
    /// over the previous snapshot.
    pub fn save(&self, snapshot: &StoreSnapshot) -> StorageResult<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let serialized = rmp_serde::to_vec(snapshot)?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&serialized)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self) -> StorageResult<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Decode(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE_NAME), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE_NAME));
        Ok(Self { wal, snapshot, durability_mode })
    }

    pub fn log(&mut self, entry: &WalEntry) -> StorageResult<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, ledgers: Vec<MileageLedger>) -> StorageResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let count = ledgers.len();
        self.snapshot.save(&StoreSnapshot::new(ledgers))?;
        self.wal.clear()?;
        tracing::debug!(target: "mileage::storage", ledgers = count, "Checkpoint written");
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Rebuilds the record set: snapshot first, then WAL entries in order.
    pub fn recover(&mut self) -> StorageResult<HashMap<Owner, MileageLedger>> {
        let mut ledgers: HashMap<Owner, MileageLedger> = match self.snapshot.load()? {
            Some(snapshot) => snapshot
                .ledgers
                .into_iter()
                .map(|ledger| (ledger.owner().clone(), ledger))
                .collect(),
            None => HashMap::new(),
        };

        for entry in self.wal.recover()? {
            let ledger = entry.into_ledger();
            ledgers.insert(ledger.owner().clone(), ledger);
        }
        Ok(ledgers)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Miles;
    use tempfile::TempDir;

    fn ledger(owner: &str, total: f64) -> MileageLedger {
        MileageLedger::new(Owner::new(owner).unwrap(), Miles::new(total).unwrap(), Utc::now())
    }

    #[test]
    fn test_wal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Create(ledger("alice", 0.0))).unwrap();
        wal.append(&WalEntry::Save(ledger("alice", 12.0))).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].ledger().current_total().value(), 12.0);
    }

    #[test]
    fn test_wal_ignores_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Create(ledger("alice", 3.0))).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_recovery_truncates_torn_tail_before_next_append() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let intact_len = {
            let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
            wal.append(&WalEntry::Create(ledger("alice", 3.0))).unwrap();
            fs::metadata(&wal_path).unwrap().len()
        };
        {
            let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        assert_eq!(wal.recover().unwrap().len(), 1);
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), intact_len);
        wal.append(&WalEntry::Save(ledger("alice", 8.0))).unwrap();

        let entries = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].ledger().current_total().value(), 8.0);
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot_mgr = SnapshotManager::new(temp_dir.path().join("test.snapshot"));
        snapshot_mgr
            .save(&StoreSnapshot::new(vec![ledger("alice", 1.0), ledger("bob", 2.0)]))
            .unwrap();
        assert!(snapshot_mgr.exists());
        let loaded = snapshot_mgr.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.ledger_count, 2);
        assert_eq!(loaded.ledgers.len(), 2);
    }

    #[test]
    fn test_checkpoint_clears_wal() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        persistence.log(&WalEntry::Create(ledger("alice", 0.0))).unwrap();
        persistence.log(&WalEntry::Save(ledger("alice", 5.0))).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 2);
        persistence.checkpoint(vec![ledger("alice", 5.0)]).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 0);
        assert!(persistence.wal().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_recovery_replays_wal_over_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut persistence =
                PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
            persistence.checkpoint(vec![ledger("alice", 10.0), ledger("bob", 20.0)]).unwrap();
            persistence.log(&WalEntry::Save(ledger("alice", 11.0))).unwrap();
            persistence.log(&WalEntry::Create(ledger("carol", 30.0))).unwrap();
        }
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        let recovered = persistence.recover().unwrap();
        assert_eq!(recovered.len(), 3);
        let alice = Owner::new("alice").unwrap();
        assert_eq!(recovered[&alice].current_total().value(), 11.0);
    }

    #[test]
    fn test_durability_none_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::None).unwrap();
        persistence.log(&WalEntry::Create(ledger("alice", 1.0))).unwrap();
        persistence.checkpoint(vec![ledger("alice", 1.0)]).unwrap();
        assert!(!temp_dir.path().join(WAL_FILE_NAME).exists());
        assert!(!persistence.snapshot().exists());
    }
}
