use crate::core::types::Owner;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MileageError {
    #[error("Invalid mileage value: {0}")]
    InvalidValue(String),

    #[error("No mileage ledger found for owner '{0}'")]
    NotFound(Owner),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MileageError {
    /// Caller-correctable errors are rejected back to the caller; the rest
    /// are infrastructure failures.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidValue(_) | Self::NotFound(_))
    }
}

/// Failure reported by a ledger store implementation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Ledger for owner '{0}' already exists")]
    Conflict(Owner),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::convert::Infallible> for MileageError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MileageError>;
