// ============================================================================
// Mileage Tracker Library
// ============================================================================

pub mod clock;
pub mod config;
pub mod core;
pub mod ledger;
pub mod scheduler;
pub mod storage;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use core::{
    MileageError, MileageLedger, Miles, Owner, Quarter, QuarterlySnapshot, Result, SnapshotTotals,
    StorageError, YearlySnapshot,
};
pub use ledger::LedgerService;
pub use scheduler::{
    CatchUpPolicy, RolloverScheduler, SchedulerHandle, SchedulerState, SweepReport, Trigger,
    TriggerWindow,
};
pub use storage::{DurabilityMode, InMemoryLedgerStore, LedgerStore};

use std::sync::Arc;

// ============================================================================
// High-level tracker API
// ============================================================================

/// A ledger store, the ledger operations on top of it and the rollover
/// scheduler, wired from one [`TrackerConfig`].
///
/// # Examples
///
/// ```
/// use mileage_tracker::{MileageTracker, Owner, TrackerConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// tokio_test::block_on(async {
///     let tracker = MileageTracker::open(TrackerConfig::default())?;
///     let alice = Owner::new("alice")?;
///
///     tracker.ledgers().adjust_total(&alice, 12.5).await?;
///     tracker.ledgers().adjust_total(&alice, 30.0).await?;
///
///     let ledger = tracker.ledgers().get(&alice).await?;
///     assert_eq!(ledger.current_total().value(), 42.5);
///     Ok::<(), Box<dyn std::error::Error>>(())
/// })
/// # }
/// ```
pub struct MileageTracker {
    config: TrackerConfig,
    store: Arc<InMemoryLedgerStore>,
    ledgers: LedgerService,
}

impl MileageTracker {
    /// Open a tracker on the system clock
    ///
    /// With `data_dir` set, ledgers left by a previous process are recovered
    /// from its WAL and snapshot.
    pub fn open(config: TrackerConfig) -> Result<Self> {
        let clock = match config.utc_offset {
            Some(offset) => SystemClock::new(offset),
            None => SystemClock::local(),
        };
        Self::with_clock(config, Arc::new(clock))
    }

    /// Open a tracker on an explicit clock
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let store = match &config.data_dir {
            Some(dir) => InMemoryLedgerStore::open(dir, config.durability, config.checkpoint_threshold)?,
            None => InMemoryLedgerStore::new(),
        };
        let store = Arc::new(store);
        let ledgers = LedgerService::new(store.clone(), clock);

        Ok(Self { config, store, ledgers })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn ledgers(&self) -> &LedgerService {
        &self.ledgers
    }

    /// A scheduler sharing this tracker's ledgers and clock
    pub fn scheduler(&self) -> RolloverScheduler {
        RolloverScheduler::from_config(self.ledgers.clone(), &self.config)
    }

    /// Spawn the rollover loop on the current tokio runtime
    pub fn start_scheduler(&self) -> SchedulerHandle {
        self.scheduler().spawn()
    }

    /// Snapshot every ledger and truncate the WAL; a no-op in memory
    pub async fn checkpoint(&self) -> Result<()> {
        self.store.checkpoint().await?;
        Ok(())
    }
}
