//! Ledger operations exposed to the user-facing layer and used by the
//! rollover scheduler.

pub mod locks;

pub use locks::{OwnerGuard, OwnerLocks};

use crate::clock::Clock;
use crate::core::period::current_quarter_for;
use crate::core::{MileageError, MileageLedger, Miles, Owner, Quarter, Result, SnapshotTotals};
use crate::storage::LedgerStore;
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use std::sync::Arc;

/// Entry point for every ledger mutation.
///
/// Each operation is a single read-modify-write executed while holding the
/// owner's lock, so concurrent callers for the same owner cannot lose each
/// other's updates.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<OwnerLocks>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: Arc::new(OwnerLocks::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch without creating.
    pub async fn get(&self, owner: &Owner) -> Result<MileageLedger> {
        self.store
            .find_by_owner(owner)
            .await?
            .ok_or_else(|| MileageError::NotFound(owner.clone()))
    }

    pub async fn get_or_create(&self, owner: &Owner) -> Result<MileageLedger> {
        let (ledger, ()) = self.modify(owner, true, |_, _| Ok(())).await?;
        Ok(ledger)
    }

    /// Overwrites the running total, creating the ledger if needed.
    ///
    /// Accepts anything convertible to [`Miles`]: `f64`, `&str`,
    /// `&serde_json::Value` or `Miles` itself. Invalid input is rejected before
    /// the ledger is touched.
    pub async fn set_current_total<V>(&self, owner: &Owner, value: V) -> Result<MileageLedger>
    where
        V: TryInto<Miles>,
        MileageError: From<V::Error>,
    {
        let total: Miles = value.try_into().map_err(MileageError::from)?;
        let (ledger, ()) = self
            .modify(owner, true, |ledger, now| {
                ledger.set_current_total(total, now.with_timezone(&Utc));
                Ok(())
            })
            .await?;
        tracing::debug!(target: "mileage::ledger", %owner, %total, "Set current total");
        Ok(ledger)
    }

    pub async fn reset_total(&self, owner: &Owner) -> Result<MileageLedger> {
        self.set_current_total(owner, Miles::ZERO).await
    }

    /// Increments (positive `delta`) or decrements (negative `delta`) the
    /// running total. A result below zero is rejected.
    pub async fn adjust_total(&self, owner: &Owner, delta: f64) -> Result<MileageLedger> {
        let (ledger, ()) = self
            .modify(owner, true, |ledger, now| {
                let next = ledger.current_total().adjusted_by(delta)?;
                ledger.set_current_total(next, now.with_timezone(&Utc));
                Ok(())
            })
            .await?;
        tracing::debug!(
            target: "mileage::ledger",
            %owner,
            delta,
            total = %ledger.current_total(),
            "Adjusted current total"
        );
        Ok(ledger)
    }

    /// Empties both snapshot sequences; the running total is kept.
    pub async fn clear_history(&self, owner: &Owner) -> Result<MileageLedger> {
        let (ledger, ()) = self
            .modify(owner, false, |ledger, now| {
                ledger.clear_history(now.with_timezone(&Utc));
                Ok(())
            })
            .await?;
        tracing::info!(target: "mileage::ledger", %owner, "Cleared mileage history");
        Ok(ledger)
    }

    pub async fn upsert_quarterly_snapshot(
        &self,
        owner: &Owner,
        quarter: Quarter,
        year: i32,
        total: Miles,
        saved_at: DateTime<Utc>,
    ) -> Result<MileageLedger> {
        let (ledger, upsert) = self
            .modify(owner, false, |ledger, _| {
                Ok(ledger.upsert_quarterly(quarter, year, total, saved_at))
            })
            .await?;
        tracing::debug!(target: "mileage::ledger", %owner, %quarter, year, ?upsert, "Quarterly snapshot stored");
        Ok(ledger)
    }

    /// Stores the yearly snapshot; with `reset` the running total is zeroed in
    /// the same write, so both effects persist together or not at all.
    pub async fn upsert_yearly_snapshot(
        &self,
        owner: &Owner,
        year: i32,
        total: Miles,
        saved_at: DateTime<Utc>,
        reset: bool,
    ) -> Result<MileageLedger> {
        let (ledger, upsert) = self
            .modify(owner, false, |ledger, _| {
                let upsert = ledger.upsert_yearly(year, total, saved_at);
                if reset {
                    ledger.set_current_total(Miles::ZERO, saved_at);
                }
                Ok(upsert)
            })
            .await?;
        tracing::debug!(target: "mileage::ledger", %owner, year, reset, ?upsert, "Yearly snapshot stored");
        Ok(ledger)
    }

    /// Snapshots the running total into the quarter that is in progress now.
    pub async fn save_quarterly_total(&self, owner: &Owner) -> Result<MileageLedger> {
        let (ledger, (quarter, year)) = self
            .modify(owner, false, |ledger, now| {
                let (quarter, year) = current_quarter_for(now.date_naive());
                let total = ledger.current_total();
                ledger.upsert_quarterly(quarter, year, total, now.with_timezone(&Utc));
                Ok((quarter, year))
            })
            .await?;
        tracing::info!(target: "mileage::ledger", %owner, %quarter, year, "Saved quarterly total");
        Ok(ledger)
    }

    /// Snapshots the running total into the current year, then zeroes it.
    pub async fn save_yearly_total_and_reset(&self, owner: &Owner) -> Result<MileageLedger> {
        let (ledger, year) = self
            .modify(owner, false, |ledger, now| {
                let year = now.year();
                let saved_at = now.with_timezone(&Utc);
                let total = ledger.current_total();
                ledger.upsert_yearly(year, total, saved_at);
                ledger.set_current_total(Miles::ZERO, saved_at);
                Ok(year)
            })
            .await?;
        tracing::info!(target: "mileage::ledger", %owner, year, "Saved yearly total and reset");
        Ok(ledger)
    }

    pub async fn get_totals(&self, owner: &Owner) -> Result<SnapshotTotals> {
        Ok(self.get(owner).await?.totals())
    }

    pub async fn owners(&self) -> Result<Vec<Owner>> {
        Ok(self
            .store
            .find_all()
            .await?
            .into_iter()
            .map(|ledger| ledger.owner().clone())
            .collect())
    }

    /// Read-modify-write on an existing ledger. The store is not written when
    /// `f` leaves the ledger unchanged.
    pub(crate) async fn modify_existing<T, F>(&self, owner: &Owner, f: F) -> Result<(MileageLedger, T)>
    where
        T: Send,
        F: FnOnce(&mut MileageLedger, DateTime<FixedOffset>) -> Result<T> + Send,
    {
        self.modify(owner, false, f).await
    }

    async fn modify<T, F>(&self, owner: &Owner, create_missing: bool, f: F) -> Result<(MileageLedger, T)>
    where
        T: Send,
        F: FnOnce(&mut MileageLedger, DateTime<FixedOffset>) -> Result<T> + Send,
    {
        let _guard = self.locks.acquire(owner).await;
        let now = self.clock.now();

        let (mut ledger, is_new) = match self.store.find_by_owner(owner).await? {
            Some(ledger) => (ledger, false),
            None if create_missing => (
                MileageLedger::new(owner.clone(), Miles::ZERO, now.with_timezone(&Utc)),
                true,
            ),
            None => return Err(MileageError::NotFound(owner.clone())),
        };

        let before = ledger.clone();
        let outcome = f(&mut ledger, now)?;

        let ledger = if is_new {
            let ledger = self.store.create(ledger).await?;
            tracing::info!(target: "mileage::ledger", %owner, id = %ledger.id(), "Created mileage ledger");
            ledger
        } else if ledger == before {
            ledger
        } else {
            self.store.save(ledger).await?
        };
        Ok((ledger, outcome))
    }
}
