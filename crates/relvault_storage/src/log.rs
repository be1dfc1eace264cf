//! Transaction log provider trait.

use crate::error::StorageResult;
use bytes::Bytes;
use std::time::Duration;

/// One delivered transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Id assigned by the log when the entry was durably appended.
    pub transaction_id: u64,
    /// The serialized transaction, exactly as appended.
    pub payload: Bytes,
}

/// An append-only, totally ordered, durable transaction stream.
///
/// # Invariants
///
/// - `append` assigns ids atomically; ids are dense and start at 0
/// - `poll` delivers every entry exactly once per handle, in id order,
///   including entries appended through other handles or processes
/// - after `seek(id)`, the next delivered entry has an id greater than `id`
/// - implementations must be `Send + Sync`; `append` may be called from
///   any thread while one consumer thread polls
pub trait TransactionLog: Send + Sync {
    /// Durably appends `payload` and returns the transaction id assigned to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be made durable. No id is
    /// consumed in that case.
    fn append(&self, store_name: &str, payload: &[u8]) -> StorageResult<u64>;

    /// Waits up to `timeout` for the next undelivered entry.
    ///
    /// Returns `Ok(None)` on timeout so the caller can check its own
    /// liveness flags.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the log fails.
    fn poll(&self, timeout: Duration) -> StorageResult<Option<LogEntry>>;

    /// Advances the read cursor to just after `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be scanned.
    fn seek(&self, transaction_id: u64) -> StorageResult<()>;

    /// Returns the id of the most recently appended entry, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be inspected.
    fn head(&self) -> StorageResult<Option<u64>>;
}
