//! Periodic quarter/year rollover.
//!
//! The scheduler wakes once at start-up, then on a fixed interval and at every
//! opening of the trigger window. Each wake-up checks the local wall clock
//! against the window and the calendar and archives every ledger's running
//! total into the period that has just closed.

pub mod plan;
pub mod window;

pub use plan::{RolloverOutcome, RolloverPlan};
pub use window::TriggerWindow;

use crate::config::TrackerConfig;
use crate::core::period::start_of_day;
use crate::core::{Owner, Result};
use crate::ledger::LedgerService;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Woken,
    Evaluating,
}

/// What the start-up sweep does when the process comes up on a boundary day
/// after the trigger window has already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CatchUpPolicy {
    /// Only act inside the trigger window, start-up included
    #[default]
    WindowOnly,
    /// At start-up, act on a boundary day at any time of day
    BoundaryDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Startup,
    Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    /// `None` when the ledger listing itself failed
    pub owner: Option<Owner>,
    pub error: String,
}

/// Result of one wake-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub at: DateTime<FixedOffset>,
    pub trigger: Trigger,
    /// Set only when the wake-up was due and fell on a boundary day
    pub plan: Option<RolloverPlan>,
    pub examined: usize,
    pub quarterly_closed: usize,
    pub yearly_closed: usize,
    pub already_closed: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn idle(at: DateTime<FixedOffset>, trigger: Trigger) -> Self {
        Self {
            at,
            trigger,
            plan: None,
            examined: 0,
            quarterly_closed: 0,
            yearly_closed: 0,
            already_closed: 0,
            failures: Vec::new(),
        }
    }

    pub fn acted(&self) -> bool {
        self.plan.is_some()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct RolloverScheduler {
    ledgers: LedgerService,
    window: TriggerWindow,
    wake_interval: Duration,
    catch_up: CatchUpPolicy,
    concurrency: usize,
    state: watch::Sender<SchedulerState>,
}

impl RolloverScheduler {
    pub fn new(ledgers: LedgerService) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            ledgers,
            window: TriggerWindow::default(),
            wake_interval: DEFAULT_WAKE_INTERVAL,
            catch_up: CatchUpPolicy::default(),
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
            state,
        }
    }

    pub fn from_config(ledgers: LedgerService, config: &TrackerConfig) -> Self {
        Self::new(ledgers)
            .with_window(config.trigger_window)
            .with_wake_interval(config.wake_interval)
            .with_catch_up(config.catch_up)
            .with_concurrency(config.sweep_concurrency)
    }

    pub fn with_window(mut self, window: TriggerWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = interval;
        self
    }

    pub fn with_catch_up(mut self, policy: CatchUpPolicy) -> Self {
        self.catch_up = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn wake_interval(&self) -> Duration {
        self.wake_interval
    }

    /// One wake-up at the clock's current time.
    pub async fn sweep(&self, trigger: Trigger) -> SweepReport {
        let now = self.ledgers.clock().now();
        self.sweep_at(now, trigger).await
    }

    /// One wake-up at an explicit local time.
    pub async fn sweep_at(&self, now: DateTime<FixedOffset>, trigger: Trigger) -> SweepReport {
        self.state.send_replace(SchedulerState::Woken);
        let mut report = SweepReport::idle(now, trigger);

        self.state.send_replace(SchedulerState::Evaluating);
        if self.is_due(now, trigger) {
            if let Some(plan) = RolloverPlan::for_date(now.date_naive()) {
                tracing::info!(
                    target: "mileage::scheduler",
                    date = %plan.date,
                    close_quarter = ?plan.close_quarter,
                    close_year = ?plan.close_year,
                    ?trigger,
                    "Running mileage rollover"
                );
                report.plan = Some(plan);
                self.close_periods(plan, now, &mut report).await;
            }
        } else {
            tracing::trace!(target: "mileage::scheduler", %now, ?trigger, "Outside trigger window");
        }

        self.state.send_replace(SchedulerState::Idle);
        if report.acted() {
            tracing::info!(
                target: "mileage::scheduler",
                examined = report.examined,
                quarterly = report.quarterly_closed,
                yearly = report.yearly_closed,
                already_closed = report.already_closed,
                failed = report.failures.len(),
                "Mileage rollover finished"
            );
        }
        report
    }

    fn is_due(&self, now: DateTime<FixedOffset>, trigger: Trigger) -> bool {
        if self.window.contains(now.time()) {
            return true;
        }
        trigger == Trigger::Startup && self.catch_up == CatchUpPolicy::BoundaryDay
    }

    async fn close_periods(
        &self,
        plan: RolloverPlan,
        now: DateTime<FixedOffset>,
        report: &mut SweepReport,
    ) {
        let owners = match self.ledgers.owners().await {
            Ok(owners) => owners,
            Err(e) => {
                tracing::error!(target: "mileage::scheduler", "Failed to list ledgers: {}", e);
                report.failures.push(SweepFailure { owner: None, error: e.to_string() });
                return;
            }
        };
        report.examined = owners.len();

        let saved_at = now.with_timezone(&Utc);
        let boundary_start = start_of_day(plan.date, *now.offset());

        let results: Vec<(Owner, Result<RolloverOutcome>)> = stream::iter(owners)
            .map(|owner| async move {
                let result = self
                    .ledgers
                    .modify_existing(&owner, |ledger, _| {
                        Ok(plan.apply(ledger, saved_at, boundary_start))
                    })
                    .await
                    .map(|(_, outcome)| outcome);
                (owner, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (owner, result) in results {
            match result {
                Ok(outcome) if outcome.is_noop() => {
                    report.already_closed += 1;
                    tracing::debug!(target: "mileage::scheduler", %owner, "Period already closed");
                }
                Ok(outcome) => {
                    if let Some((quarter, year)) = outcome.quarter_closed {
                        report.quarterly_closed += 1;
                        tracing::info!(
                            target: "mileage::scheduler",
                            %owner, %quarter, year,
                            "Saved quarterly total"
                        );
                    }
                    if let Some(year) = outcome.year_closed {
                        report.yearly_closed += 1;
                        tracing::info!(
                            target: "mileage::scheduler",
                            %owner, year,
                            "Saved yearly total and reset"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "mileage::scheduler",
                        %owner,
                        "Failed to roll over mileage: {}",
                        e
                    );
                    report.failures.push(SweepFailure { owner: Some(owner), error: e.to_string() });
                }
            }
        }
    }

    /// Time until the next wake-up: one wake interval, cut short so a
    /// wake-up always lands just after the next window opening.
    pub fn next_wake_delay(&self, now: DateTime<FixedOffset>) -> Duration {
        let interval = self.wake_interval.max(Duration::from_millis(1));
        let grace = (self.window.tolerance() / 2).min(TimeDelta::seconds(1));

        let window_offset = self.window.start() - NaiveTime::MIN;
        let mut opening = start_of_day(now.date_naive(), *now.offset()) + window_offset + grace;
        if opening <= now.with_timezone(&Utc) {
            opening += TimeDelta::days(1);
        }

        let until_opening = (opening - now.with_timezone(&Utc)).to_std().unwrap_or_default();
        interval.min(until_opening)
    }

    /// Starts the wake-up loop on the current tokio runtime. The first sweep
    /// runs immediately with [`Trigger::Startup`]; later ones follow
    /// [`RolloverScheduler::next_wake_delay`].
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (report_tx, report_rx) = watch::channel(None);
        let state_rx = self.state.subscribe();

        let task = tokio::spawn(async move {
            let mut trigger = Trigger::Startup;

            tracing::info!(
                target: "mileage::scheduler",
                interval_secs = self.wake_interval.as_secs(),
                catch_up = ?self.catch_up,
                "Mileage scheduler started"
            );

            loop {
                let report = self.sweep(trigger).await;
                trigger = Trigger::Interval;
                let delay = self.next_wake_delay(report.at);
                report_tx.send_replace(Some(report));

                tracing::trace!(target: "mileage::scheduler", delay_secs = delay.as_secs(), "Sleeping");
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tracing::info!(target: "mileage::scheduler", "Mileage scheduler stopped");
        });

        SchedulerHandle {
            stop: stop_tx,
            task,
            state: state_rx,
            reports: report_rx,
        }
    }
}

/// Handle to a running scheduler loop. Dropping it stops the loop.
pub struct SchedulerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
    reports: watch::Receiver<Option<SweepReport>>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver that changes after every completed wake-up.
    pub fn reports(&self) -> watch::Receiver<Option<SweepReport>> {
        self.reports.clone()
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.reports.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop after the sweep in progress, if any, completes.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(target: "mileage::scheduler", "Scheduler task ended abnormally: {}", e);
        }
    }
}
