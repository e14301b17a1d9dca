use crate::core::period::{
    closed_quarter_for, closed_year_for, is_first_day_of_quarter, is_first_day_of_year,
};
use crate::core::{MileageLedger, Miles, Quarter};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// What a boundary day closes: the quarter that just ended and, on
/// January 1, the year that just ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloverPlan {
    pub date: NaiveDate,
    pub close_quarter: Option<(Quarter, i32)>,
    pub close_year: Option<i32>,
}

/// Effect of applying a plan to one ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RolloverOutcome {
    pub quarter_closed: Option<(Quarter, i32)>,
    pub year_closed: Option<i32>,
    /// Total archived into the closed period(s), read before any reset
    pub archived_total: Option<Miles>,
}

impl RolloverOutcome {
    pub fn is_noop(&self) -> bool {
        self.quarter_closed.is_none() && self.year_closed.is_none()
    }
}

impl RolloverPlan {
    /// `None` unless `date` is the first day of a quarter.
    pub fn for_date(date: NaiveDate) -> Option<Self> {
        let close_quarter = is_first_day_of_quarter(date).then(|| closed_quarter_for(date));
        let close_year = is_first_day_of_year(date).then(|| closed_year_for(date));
        if close_quarter.is_none() && close_year.is_none() {
            return None;
        }
        Some(Self { date, close_quarter, close_year })
    }

    /// Archives the running total into the closed period(s) and, for a year
    /// close, zeroes it.
    ///
    /// Both snapshots are taken from the total as it stood before this call,
    /// independent of the order the two closes are applied in. A period whose
    /// snapshot was already written at or after `boundary_start` counts as
    /// closed and is left alone; that keeps repeated wake-ups on the same
    /// boundary day from re-archiving (or re-zeroing) a total.
    pub fn apply(
        &self,
        ledger: &mut MileageLedger,
        saved_at: DateTime<Utc>,
        boundary_start: DateTime<Utc>,
    ) -> RolloverOutcome {
        let closing_total = ledger.current_total();
        let mut outcome = RolloverOutcome::default();

        if let Some((quarter, year)) = self.close_quarter {
            let already_closed = ledger
                .quarterly_snapshot(quarter, year)
                .is_some_and(|snapshot| snapshot.saved_at >= boundary_start);
            if !already_closed {
                ledger.upsert_quarterly(quarter, year, closing_total, saved_at);
                outcome.quarter_closed = Some((quarter, year));
            }
        }

        if let Some(year) = self.close_year {
            let already_closed = ledger
                .yearly_snapshot(year)
                .is_some_and(|snapshot| snapshot.saved_at >= boundary_start);
            if !already_closed {
                ledger.upsert_yearly(year, closing_total, saved_at);
                ledger.set_current_total(Miles::ZERO, saved_at);
                outcome.year_closed = Some(year);
            }
        }

        if !outcome.is_noop() {
            outcome.archived_total = Some(closing_total);
        }
        outcome
    }
}
