use chrono::{NaiveTime, TimeDelta};

/// Time-of-day interval after which a boundary is no longer "on time".
///
/// The scheduler adds a wake-up just after each opening, so a
/// coarse wake interval still lands inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerWindow {
    start: NaiveTime,
    tolerance: TimeDelta,
}

impl TriggerWindow {
    pub fn new(start: NaiveTime, tolerance: TimeDelta) -> Self {
        Self { start, tolerance }
    }

    /// Window opening at local midnight.
    pub fn after_midnight(tolerance: TimeDelta) -> Self {
        Self::new(NaiveTime::MIN, tolerance)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn tolerance(&self) -> TimeDelta {
        self.tolerance
    }

    /// `start <= time < start + tolerance`, never wrapping past midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let Some(elapsed) = time.signed_duration_since(self.start).to_std().ok() else {
            return false;
        };
        match self.tolerance.to_std() {
            Ok(tolerance) => elapsed < tolerance,
            Err(_) => false,
        }
    }
}

impl Default for TriggerWindow {
    fn default() -> Self {
        Self::after_midnight(TimeDelta::minutes(5))
    }
}
