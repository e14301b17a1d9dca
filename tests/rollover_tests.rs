/// Rollover scheduler tests
///
/// Boundary scenarios driven by a manual clock, failure isolation across
/// ledgers, and the timer loop under paused tokio time.
/// Run with: cargo test --test rollover_tests

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Timelike};
use mileage_tracker::core::StorageError;
use mileage_tracker::storage::StorageResult;
use mileage_tracker::{
    CatchUpPolicy, Clock, InMemoryLedgerStore, LedgerService, LedgerStore, ManualClock, MileageLedger,
    Miles, Owner, Quarter, RolloverScheduler, SchedulerState, TrackerConfig, Trigger,
};
use std::sync::Arc;
use std::time::Duration;

fn owner(id: &str) -> Owner {
    Owner::new(id).unwrap()
}

fn setup(at: &str) -> (LedgerService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::parse(at).unwrap());
    let ledgers = LedgerService::new(Arc::new(InMemoryLedgerStore::new()), clock.clone());
    (ledgers, clock)
}

#[tokio::test]
async fn test_quarter_rollover_keeps_running_total() {
    let (ledgers, clock) = setup("2025-06-30T18:00:00+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 500.0).await.unwrap();
    let scheduler = RolloverScheduler::new(ledgers.clone());

    clock.set(DateTime::parse_from_rfc3339("2025-07-01T00:02:00+00:00").unwrap());
    let report = scheduler.sweep(Trigger::Interval).await;

    assert!(report.acted());
    assert_eq!(report.quarterly_closed, 1);
    assert_eq!(report.yearly_closed, 0);
    let ledger = ledgers.get(&alice).await.unwrap();
    let snapshots: Vec<_> = ledger.quarterly_snapshots().collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!((snapshots[0].quarter, snapshots[0].year), (Quarter::Q2, 2025));
    assert_eq!(snapshots[0].total.value(), 500.0);
    assert_eq!(ledger.current_total().value(), 500.0);
}

#[tokio::test]
async fn test_year_rollover_closes_q4_and_year_then_resets() {
    let (ledgers, clock) = setup("2025-12-31T20:00:00+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 1200.0).await.unwrap();
    let scheduler = RolloverScheduler::new(ledgers.clone());

    clock.advance(TimeDelta::hours(4) + TimeDelta::minutes(3));
    let report = scheduler.sweep(Trigger::Interval).await;

    assert_eq!(report.quarterly_closed, 1);
    assert_eq!(report.yearly_closed, 1);
    let ledger = ledgers.get(&alice).await.unwrap();
    assert_eq!(ledger.quarterly_snapshot(Quarter::Q4, 2025).unwrap().total.value(), 1200.0);
    assert_eq!(ledger.yearly_snapshot(2025).unwrap().total.value(), 1200.0);
    assert_eq!(ledger.current_total(), Miles::ZERO);
}

#[tokio::test]
async fn test_rollover_uses_local_midnight() {
    // 00:03 on Jan 1 in UTC-08:00 is still Dec 31 in UTC
    let (ledgers, _) = setup("2026-01-01T00:03:00-08:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 75.0).await.unwrap();

    let report = RolloverScheduler::new(ledgers.clone()).sweep(Trigger::Interval).await;

    assert_eq!(report.yearly_closed, 1);
    assert!(ledgers.get(&alice).await.unwrap().yearly_snapshot(2025).is_some());
}

#[tokio::test]
async fn test_missed_boundary_is_not_caught_up_by_default() {
    let (ledgers, _) = setup("2025-01-01T09:00:00+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 300.0).await.unwrap();

    let report = RolloverScheduler::new(ledgers.clone()).sweep(Trigger::Startup).await;

    assert!(!report.acted());
    let ledger = ledgers.get(&alice).await.unwrap();
    assert_eq!(ledger.quarterly_snapshots().count(), 0);
    assert_eq!(ledger.yearly_snapshots().count(), 0);
    assert_eq!(ledger.current_total().value(), 300.0);
}

#[tokio::test]
async fn test_boundary_day_policy_catches_up_at_startup() {
    let (ledgers, _) = setup("2025-01-01T09:00:00+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 300.0).await.unwrap();
    let scheduler = RolloverScheduler::new(ledgers.clone()).with_catch_up(CatchUpPolicy::BoundaryDay);

    let report = scheduler.sweep(Trigger::Startup).await;

    assert_eq!(report.yearly_closed, 1);
    let ledger = ledgers.get(&alice).await.unwrap();
    assert_eq!(ledger.quarterly_snapshot(Quarter::Q4, 2024).unwrap().total.value(), 300.0);
    assert_eq!(ledger.yearly_snapshot(2024).unwrap().total.value(), 300.0);
    assert_eq!(ledger.current_total(), Miles::ZERO);
}

#[tokio::test]
async fn test_ticks_inside_same_window_do_not_rezero() {
    let (ledgers, clock) = setup("2026-01-01T00:00:30+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 1200.0).await.unwrap();
    let scheduler = RolloverScheduler::new(ledgers.clone());

    scheduler.sweep(Trigger::Startup).await;
    // Mileage logged right after the reset must survive the next tick
    ledgers.adjust_total(&alice, 6.0).await.unwrap();
    clock.advance(TimeDelta::minutes(3));
    let report = scheduler.sweep(Trigger::Interval).await;

    assert_eq!(report.already_closed, 1);
    let ledger = ledgers.get(&alice).await.unwrap();
    assert_eq!(ledger.current_total().value(), 6.0);
    assert_eq!(ledger.yearly_snapshot(2025).unwrap().total.value(), 1200.0);
}

#[tokio::test]
async fn test_every_ledger_is_rolled_over() {
    let (ledgers, _) = setup("2025-10-01T00:01:00+00:00");
    for i in 0..20 {
        ledgers.set_current_total(&owner(&format!("driver-{i}")), f64::from(i)).await.unwrap();
    }
    let scheduler = RolloverScheduler::new(ledgers.clone()).with_concurrency(3);

    let report = scheduler.sweep(Trigger::Interval).await;

    assert_eq!(report.examined, 20);
    assert_eq!(report.quarterly_closed, 20);
    assert!(report.is_clean());
    let ledger = ledgers.get(&owner("driver-7")).await.unwrap();
    assert_eq!(ledger.quarterly_snapshot(Quarter::Q3, 2025).unwrap().total.value(), 7.0);
}

/// Store that refuses to save one owner's ledger.
struct FailingStore {
    inner: InMemoryLedgerStore,
    broken: Owner,
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn find_by_owner(&self, owner: &Owner) -> StorageResult<Option<MileageLedger>> {
        self.inner.find_by_owner(owner).await
    }

    async fn create(&self, ledger: MileageLedger) -> StorageResult<MileageLedger> {
        self.inner.create(ledger).await
    }

    async fn save(&self, ledger: MileageLedger) -> StorageResult<MileageLedger> {
        if ledger.owner() == &self.broken {
            return Err(StorageError::Unavailable("disk full".to_string()));
        }
        self.inner.save(ledger).await
    }

    async fn find_all(&self) -> StorageResult<Vec<MileageLedger>> {
        self.inner.find_all().await
    }
}

#[tokio::test]
async fn test_one_failing_ledger_does_not_stop_the_sweep() {
    let clock = Arc::new(ManualClock::parse("2025-04-01T00:01:00+00:00").unwrap());
    let store = Arc::new(FailingStore {
        inner: InMemoryLedgerStore::new(),
        broken: owner("bob"),
    });
    let ledgers = LedgerService::new(store, clock);
    for (id, total) in [("alice", 10.0), ("bob", 20.0), ("carol", 30.0)] {
        ledgers.set_current_total(&owner(id), total).await.unwrap();
    }

    let report = RolloverScheduler::new(ledgers.clone()).sweep(Trigger::Interval).await;

    assert_eq!(report.examined, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].owner, Some(owner("bob")));
    assert_eq!(report.quarterly_closed, 2);
    let carol = ledgers.get(&owner("carol")).await.unwrap();
    assert_eq!(carol.quarterly_snapshot(Quarter::Q1, 2025).unwrap().total.value(), 30.0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_loop_sweeps_at_startup_and_on_interval() {
    let (ledgers, clock) = setup("2025-06-30T23:30:00+00:00");
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 500.0).await.unwrap();

    let handle = RolloverScheduler::new(ledgers.clone())
        .with_wake_interval(Duration::from_secs(60 * 60))
        .spawn();
    let mut reports = handle.reports();

    reports.changed().await.unwrap();
    let startup = reports.borrow_and_update().clone().unwrap();
    assert_eq!(startup.trigger, Trigger::Startup);
    assert!(!startup.acted());

    clock.set(DateTime::parse_from_rfc3339("2025-07-01T00:01:00+00:00").unwrap());
    reports.changed().await.unwrap();
    let tick = reports.borrow_and_update().clone().unwrap();
    assert_eq!(tick.trigger, Trigger::Interval);
    assert_eq!(tick.quarterly_closed, 1);

    assert_eq!(handle.state(), SchedulerState::Idle);
    handle.stop().await;

    let ledger = ledgers.get(&alice).await.unwrap();
    assert_eq!(ledger.quarterly_snapshot(Quarter::Q2, 2025).unwrap().total.value(), 500.0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_loop() {
    let (ledgers, _) = setup("2025-03-15T12:00:00+00:00");
    let handle = RolloverScheduler::new(ledgers).spawn();
    let mut reports = handle.reports();
    reports.changed().await.unwrap();

    drop(handle);

    // The report sender goes away with the task
    assert!(reports.changed().await.is_err());
}

/// Wall clock that moves with tokio time, so paused tests can cross midnight.
#[derive(Debug)]
struct TokioClock {
    origin: DateTime<FixedOffset>,
    started: tokio::time::Instant,
}

impl TokioClock {
    fn starting_at(rfc3339: &str) -> Self {
        Self {
            origin: DateTime::parse_from_rfc3339(rfc3339).unwrap(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.origin + TimeDelta::from_std(self.started.elapsed()).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_default_schedule_started_mid_day_closes_next_quarter() {
    let clock = Arc::new(TokioClock::starting_at("2025-06-30T10:30:00+00:00"));
    let ledgers = LedgerService::new(Arc::new(InMemoryLedgerStore::new()), clock.clone());
    let alice = owner("alice");
    ledgers.set_current_total(&alice, 500.0).await.unwrap();

    let handle = RolloverScheduler::from_config(ledgers.clone(), &TrackerConfig::default()).spawn();
    tokio::time::sleep(Duration::from_secs(48 * 60 * 60)).await;
    handle.stop().await;

    assert!(clock.now() >= DateTime::parse_from_rfc3339("2025-07-02T10:30:00+00:00").unwrap());
    let ledger = ledgers.get(&alice).await.unwrap();
    let snapshot = ledger.quarterly_snapshot(Quarter::Q2, 2025).unwrap();
    assert_eq!(snapshot.total.value(), 500.0);
    assert_eq!(snapshot.saved_at.hour(), 0);
    assert!(snapshot.saved_at.minute() < 5);
    assert_eq!(ledger.current_total().value(), 500.0);
}
