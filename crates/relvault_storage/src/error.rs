//! Error types for provider operations.

use std::io;
use thiserror::Error;

/// Result type for provider operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by transaction log and snapshot log providers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored data failed an integrity check.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// No snapshot exists for the requested transaction id.
    #[error("snapshot not found for transaction {transaction_id}")]
    SnapshotNotFound {
        /// The requested transaction id.
        transaction_id: u64,
    },

    /// A snapshot for this transaction id was already committed.
    #[error("snapshot already exists for transaction {transaction_id}")]
    SnapshotExists {
        /// The conflicting transaction id.
        transaction_id: u64,
    },

    /// The log holds more frames than a transaction id can address, or a
    /// frame is larger than the frame header can describe.
    #[error("log capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Another process holds the provider's directory lock.
    #[error("provider locked: {0}")]
    Locked(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
