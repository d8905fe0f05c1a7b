//! Storage engine errors.
//!
//! The broker never interprets these: whatever the engine reports is sent
//! to the client unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageError {
    /// Referenced cache or origin does not exist.
    #[error("Cache or origin not found")]
    NotFound,

    /// Insertion would exceed the storage budget.
    #[error("Quota exceeded")]
    QuotaExceeded,

    /// Underlying persistence failed.
    #[error("I/O failure")]
    IoFailure,

    /// Malformed request content.
    #[error("Invalid argument")]
    InvalidArgument,
}

impl StorageError {
    /// Stable numeric code reported in completion logs.
    pub fn code(&self) -> u8 {
        match self {
            Self::NotFound => 1,
            Self::QuotaExceeded => 2,
            Self::IoFailure => 3,
            Self::InvalidArgument => 4,
        }
    }
}

impl From<url::ParseError> for StorageError {
    fn from(_: url::ParseError) -> Self {
        StorageError::InvalidArgument
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
