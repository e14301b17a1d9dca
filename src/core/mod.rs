pub mod error;
pub mod period;
pub mod types;

pub use error::{MileageError, Result, StorageError};
pub use types::{
    Miles, MileageLedger, Owner, Quarter, QuarterlySnapshot, SnapshotTotals, Upsert,
    YearlySnapshot,
};
