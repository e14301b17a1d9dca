use crate::core::error::{MileageError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Owner
// ============================================================================

/// Opaque identifier of the user a ledger belongs to.
///
/// The identity layer is trusted; the only check made here is that the
/// identifier is not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(MileageError::InvalidValue(
                "owner identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for Owner {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for Owner {
    type Err = MileageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Miles
// ============================================================================

/// A mileage amount. Always finite and never negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Miles(f64);

impl Miles {
    pub const ZERO: Miles = Miles(0.0);

    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(MileageError::InvalidValue(format!(
                "{value} is not a non-negative number"
            )));
        }
        // normalize -0.0
        if value == 0.0 {
            return Ok(Self::ZERO);
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Applies an increment (positive delta) or decrement (negative delta).
    pub fn adjusted_by(self, delta: f64) -> Result<Self> {
        if !delta.is_finite() {
            return Err(MileageError::InvalidValue(format!(
                "adjustment {delta} is not a finite number"
            )));
        }
        let next = self.0 + delta;
        if next < 0.0 {
            return Err(MileageError::InvalidValue(format!(
                "adjusting {} by {} would make the total negative",
                self.0, delta
            )));
        }
        Self::new(next)
    }
}

impl TryFrom<f64> for Miles {
    type Error = MileageError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&serde_json::Value> for Miles {
    type Error = MileageError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        match value.as_f64() {
            Some(number) => Self::new(number),
            None => Err(MileageError::InvalidValue(format!(
                "expected a number, got {value}"
            ))),
        }
    }
}

impl TryFrom<&str> for Miles {
    type Error = MileageError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl FromStr for Miles {
    type Err = MileageError;

    fn from_str(s: &str) -> Result<Self> {
        let number: f64 = s
            .trim()
            .parse()
            .map_err(|_| MileageError::InvalidValue(format!("'{s}' is not a number")))?;
        Self::new(number)
    }
}

impl From<Miles> for f64 {
    fn from(miles: Miles) -> Self {
        miles.0
    }
}

impl fmt::Display for Miles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Quarter
// ============================================================================

/// Standard calendar quarter. Serialized as its number (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Quarter {
    Q1 = 1,
    Q2 = 2,
    Q3 = 3,
    Q4 = 4,
}

impl Quarter {
    /// Quarter containing the given calendar month (1..=12).
    pub fn of_month(month: u32) -> Self {
        match month {
            1..=3 => Self::Q1,
            4..=6 => Self::Q2,
            7..=9 => Self::Q3,
            _ => Self::Q4,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    /// First calendar month (1-based) of this quarter.
    pub fn first_month(self) -> u32 {
        (self.number() as u32 - 1) * 3 + 1
    }

    /// The preceding quarter within the same year, `None` for Q1.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Q1 => None,
            Self::Q2 => Some(Self::Q1),
            Self::Q3 => Some(Self::Q2),
            Self::Q4 => Some(Self::Q3),
        }
    }
}

impl TryFrom<u8> for Quarter {
    type Error = MileageError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Q1),
            2 => Ok(Self::Q2),
            3 => Ok(Self::Q3),
            4 => Ok(Self::Q4),
            other => Err(MileageError::InvalidValue(format!(
                "quarter must be between 1 and 4, got {other}"
            ))),
        }
    }
}

impl From<Quarter> for u8 {
    fn from(quarter: Quarter) -> Self {
        quarter.number()
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlySnapshot {
    pub quarter: Quarter,
    pub year: i32,
    pub total: Miles,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlySnapshot {
    pub year: i32,
    pub total: Miles,
    pub saved_at: DateTime<Utc>,
}

/// Whether an upsert added a new period or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Both archived sequences of a ledger, oldest period first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTotals {
    pub quarterly_snapshots: Vec<QuarterlySnapshot>,
    pub yearly_snapshots: Vec<YearlySnapshot>,
}

// ============================================================================
// Ledger
// ============================================================================

type QuarterKey = (i32, Quarter);

/// Per-owner mileage record: the running total plus archived period totals.
///
/// Snapshots are keyed by period so a `(quarter, year)` or `year` can only
/// ever appear once; on the wire they are plain ordered sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileageLedger {
    id: Uuid,
    owner: Owner,
    current_total: Miles,
    #[serde(rename = "quarterlySnapshots", with = "quarterly_seq")]
    quarterly: BTreeMap<QuarterKey, QuarterlySnapshot>,
    #[serde(rename = "yearlySnapshots", with = "yearly_seq")]
    yearly: BTreeMap<i32, YearlySnapshot>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MileageLedger {
    pub fn new(owner: Owner, current_total: Miles, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            current_total,
            quarterly: BTreeMap::new(),
            yearly: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn current_total(&self) -> Miles {
        self.current_total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn quarterly_snapshots(&self) -> impl Iterator<Item = &QuarterlySnapshot> {
        self.quarterly.values()
    }

    pub fn yearly_snapshots(&self) -> impl Iterator<Item = &YearlySnapshot> {
        self.yearly.values()
    }

    pub fn quarterly_snapshot(&self, quarter: Quarter, year: i32) -> Option<&QuarterlySnapshot> {
        self.quarterly.get(&(year, quarter))
    }

    pub fn yearly_snapshot(&self, year: i32) -> Option<&YearlySnapshot> {
        self.yearly.get(&year)
    }

    pub fn totals(&self) -> SnapshotTotals {
        SnapshotTotals {
            quarterly_snapshots: self.quarterly.values().cloned().collect(),
            yearly_snapshots: self.yearly.values().cloned().collect(),
        }
    }

    pub fn set_current_total(&mut self, total: Miles, now: DateTime<Utc>) {
        self.current_total = total;
        self.touch(now);
    }

    pub fn upsert_quarterly(
        &mut self,
        quarter: Quarter,
        year: i32,
        total: Miles,
        saved_at: DateTime<Utc>,
    ) -> Upsert {
        let snapshot = QuarterlySnapshot { quarter, year, total, saved_at };
        let previous = self.quarterly.insert((year, quarter), snapshot);
        self.touch(saved_at);
        if previous.is_some() { Upsert::Replaced } else { Upsert::Inserted }
    }

    pub fn upsert_yearly(&mut self, year: i32, total: Miles, saved_at: DateTime<Utc>) -> Upsert {
        let previous = self.yearly.insert(year, YearlySnapshot { year, total, saved_at });
        self.touch(saved_at);
        if previous.is_some() { Upsert::Replaced } else { Upsert::Inserted }
    }

    /// Drops every archived snapshot; the running total is kept.
    pub fn clear_history(&mut self, now: DateTime<Utc>) {
        self.quarterly.clear();
        self.yearly.clear();
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

mod quarterly_seq {
    use super::{QuarterKey, QuarterlySnapshot};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<QuarterKey, QuarterlySnapshot>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<QuarterKey, QuarterlySnapshot>, D::Error> {
        let entries = Vec::<QuarterlySnapshot>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|snapshot| ((snapshot.year, snapshot.quarter), snapshot))
            .collect())
    }
}

mod yearly_seq {
    use super::YearlySnapshot;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<i32, YearlySnapshot>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<i32, YearlySnapshot>, D::Error> {
        let entries = Vec::<YearlySnapshot>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|snapshot| (snapshot.year, snapshot)).collect())
    }
}
