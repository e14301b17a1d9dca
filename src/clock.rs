//! Wall-clock sources.
//!
//! The scheduler and the manual save operations never call `Utc::now()`
//! directly; they ask a [`Clock`], so boundary behaviour can be driven from
//! tests without waiting for real midnights.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Source of the local wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Real time, either at a fixed UTC offset or following the host zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset: Some(offset) }
    }

    /// Follows the host's local offset, re-read on every call so a daylight
    /// saving change moves the clock with it.
    pub fn local() -> Self {
        Self { offset: None }
    }

    /// The configured offset, or `None` when following the host zone.
    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Starts at an RFC 3339 timestamp such as `2025-07-01T00:02:00+00:00`.
    pub fn parse(rfc3339: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(rfc3339).map(Self::new)
    }

    /// Starts at a local wall-clock time at the given offset.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = (local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))).and_utc();
        Self::new(offset.from_utc_datetime(&utc.naive_utc()))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
