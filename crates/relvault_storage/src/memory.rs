//! In-memory providers for testing.

use crate::error::{StorageError, StorageResult};
use crate::log::{LogEntry, TransactionLog};
use crate::snapshot::{SnapshotLog, SnapshotReader, SnapshotWriter};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SharedEntries {
    entries: Mutex<Vec<Bytes>>,
    appended: Condvar,
}

/// An in-memory transaction log.
///
/// The entry list is shared between every handle created with
/// [`connect`](Self::connect); each handle keeps its own read cursor. This
/// models several processes replaying the same log, or a store that is
/// closed and reopened against the same log.
///
/// # Example
///
/// ```rust
/// use relvault_storage::{MemoryTransactionLog, TransactionLog};
/// use std::time::Duration;
///
/// let writer = MemoryTransactionLog::new();
/// let reader = writer.connect();
/// writer.append("store", b"tx").unwrap();
///
/// let entry = reader.poll(Duration::from_millis(10)).unwrap();
/// assert_eq!(entry.map(|e| e.transaction_id), Some(0));
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransactionLog {
    shared: Arc<SharedEntries>,
    cursor: Mutex<u64>,
}

impl MemoryTransactionLog {
    /// Creates a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns another handle over the same entries with its cursor at the start.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cursor: Mutex::new(0),
        }
    }

    /// Returns the number of appended entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Returns true if nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_next(cursor: &mut u64, entries: &[Bytes]) -> Option<LogEntry> {
        let index = usize::try_from(*cursor).ok()?;
        let payload = entries.get(index)?.clone();
        let entry = LogEntry {
            transaction_id: *cursor,
            payload,
        };
        *cursor += 1;
        Some(entry)
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn append(&self, _store_name: &str, payload: &[u8]) -> StorageResult<u64> {
        let mut entries = self.shared.entries.lock();
        let id = entries.len() as u64;
        entries.push(Bytes::copy_from_slice(payload));
        self.shared.appended.notify_all();
        Ok(id)
    }

    fn poll(&self, timeout: Duration) -> StorageResult<Option<LogEntry>> {
        let deadline = Instant::now() + timeout;
        let mut cursor = self.cursor.lock();
        let mut entries = self.shared.entries.lock();
        loop {
            if let Some(entry) = Self::take_next(&mut cursor, &entries) {
                return Ok(Some(entry));
            }
            if self
                .shared
                .appended
                .wait_until(&mut entries, deadline)
                .timed_out()
            {
                return Ok(Self::take_next(&mut cursor, &entries));
            }
        }
    }

    fn seek(&self, transaction_id: u64) -> StorageResult<()> {
        *self.cursor.lock() = transaction_id.saturating_add(1);
        Ok(())
    }

    fn head(&self) -> StorageResult<Option<u64>> {
        let len = self.shared.entries.lock().len() as u64;
        Ok(len.checked_sub(1))
    }
}

type SnapshotMap = Arc<RwLock<BTreeMap<u64, Arc<Vec<u8>>>>>;

/// An in-memory snapshot log.
///
/// Clones share the same snapshots, so a test can hand one clone to a
/// store and inspect or reuse another after the store is closed.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotLog {
    snapshots: SnapshotMap,
}

impl MemorySnapshotLog {
    /// Creates a new empty snapshot log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Returns true if no snapshot was committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemorySnapshotWriter {
    transaction_id: u64,
    staged: Vec<u8>,
    target: SnapshotMap,
}

impl Write for MemorySnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.staged.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SnapshotWriter for MemorySnapshotWriter {
    fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut snapshots = self.target.write();
        if snapshots.contains_key(&self.transaction_id) {
            return Err(StorageError::SnapshotExists {
                transaction_id: self.transaction_id,
            });
        }
        snapshots.insert(self.transaction_id, Arc::new(self.staged));
        Ok(())
    }
}

impl SnapshotLog for MemorySnapshotLog {
    fn create_writer(&self, transaction_id: u64) -> StorageResult<Box<dyn SnapshotWriter>> {
        if self.snapshots.read().contains_key(&transaction_id) {
            return Err(StorageError::SnapshotExists { transaction_id });
        }
        Ok(Box::new(MemorySnapshotWriter {
            transaction_id,
            staged: Vec::new(),
            target: Arc::clone(&self.snapshots),
        }))
    }

    fn create_reader(&self, transaction_id: u64) -> StorageResult<SnapshotReader> {
        let snapshots = self.snapshots.read();
        let data = snapshots
            .get(&transaction_id)
            .ok_or(StorageError::SnapshotNotFound { transaction_id })?;
        Ok(Box::new(Cursor::new(data.as_ref().clone())))
    }

    fn list(&self) -> StorageResult<Vec<u64>> {
        Ok(self.snapshots.read().keys().copied().collect())
    }

    fn delete(&self, transaction_id: u64) -> StorageResult<()> {
        self.snapshots
            .write()
            .remove(&transaction_id)
            .map(|_| ())
            .ok_or(StorageError::SnapshotNotFound { transaction_id })
    }
}
