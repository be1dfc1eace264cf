//! Snapshot log provider traits.

use crate::error::StorageResult;
use std::io::{Read, Write};

/// A sink for one snapshot with commit-on-close semantics.
///
/// Bytes written are staged. They become visible to
/// [`SnapshotLog::create_reader`] and [`SnapshotLog::list`] only after
/// [`commit`](Self::commit) returns `Ok`. Dropping an uncommitted writer
/// discards everything it staged.
pub trait SnapshotWriter: Write + Send {
    /// Makes the staged snapshot durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be made durable. Nothing
    /// is visible in that case.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// A source for one committed snapshot.
pub type SnapshotReader = Box<dyn Read + Send>;

/// Storage for snapshots keyed by transaction id.
pub trait SnapshotLog: Send + Sync {
    /// Starts a snapshot for `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot for this id is already committed or
    /// the staging area cannot be created.
    fn create_writer(&self, transaction_id: u64) -> StorageResult<Box<dyn SnapshotWriter>>;

    /// Opens the committed snapshot for `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SnapshotNotFound`](crate::StorageError::SnapshotNotFound)
    /// if no such snapshot exists, or an integrity error if it is damaged.
    fn create_reader(&self, transaction_id: u64) -> StorageResult<SnapshotReader>;

    /// Lists committed snapshot transaction ids in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot storage cannot be listed.
    fn list(&self) -> StorageResult<Vec<u64>>;

    /// Deletes the committed snapshot for `transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot does not exist or cannot be removed.
    fn delete(&self, transaction_id: u64) -> StorageResult<()>;
}
