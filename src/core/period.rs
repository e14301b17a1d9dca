//! Calendar period arithmetic used by the rollover scheduler and the manual
//! save operations. Everything here is pure and works on local calendar
//! dates; only standard calendar quarters and years are supported.

use crate::core::types::Quarter;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};

/// Quarter and year that contain `date` (the in-progress period).
pub fn current_quarter_for(date: NaiveDate) -> (Quarter, i32) {
    (Quarter::of_month(date.month()), date.year())
}

/// Quarter that ended most recently before the quarter containing `date`.
///
/// Dates in Q1 close Q4 of the previous year.
pub fn closed_quarter_for(date: NaiveDate) -> (Quarter, i32) {
    let (quarter, year) = current_quarter_for(date);
    match quarter.previous() {
        Some(previous) => (previous, year),
        None => (Quarter::Q4, year - 1),
    }
}

/// Year that ended most recently before `date`.
pub fn closed_year_for(date: NaiveDate) -> i32 {
    date.year() - 1
}

pub fn is_first_day_of_year(date: NaiveDate) -> bool {
    date.month() == 1 && date.day() == 1
}

pub fn is_first_day_of_quarter(date: NaiveDate) -> bool {
    date.day() == 1 && matches!(date.month(), 1 | 4 | 7 | 10)
}

/// Local midnight of `date` at `offset`, as a UTC instant.
pub fn start_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    (local_midnight - TimeDelta::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}
