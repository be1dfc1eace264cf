//! # relvault storage
//!
//! Provider interfaces for the two external resources a relvault store
//! depends on, plus reference implementations.
//!
//! Providers are **opaque byte stores**: they never interpret the
//! transactions or snapshots they hold. The core owns every format.
//!
//! ## Transaction log
//!
//! A single, totally ordered, durable stream of transactions per store.
//! [`TransactionLog::append`] assigns the transaction id at durable-append
//! time; [`TransactionLog::poll`] hands entries back in id order with a
//! bounded wait; [`TransactionLog::seek`] moves the read cursor past a
//! recovered snapshot.
//!
//! ## Snapshot log
//!
//! Point-in-time bundles keyed by transaction id. Writers have
//! commit-on-close semantics: nothing becomes readable until
//! [`SnapshotWriter::commit`] succeeds.
//!
//! ## Available providers
//!
//! - [`MemoryTransactionLog`] / [`MemorySnapshotLog`] - for tests and ephemeral stores
//! - [`FileTransactionLog`] / [`FileSnapshotLog`] - single-directory persistent storage
//!
//! ## Example
//!
//! ```rust
//! use relvault_storage::{MemoryTransactionLog, TransactionLog};
//! use std::time::Duration;
//!
//! let log = MemoryTransactionLog::new();
//! let id = log.append("people", b"payload").unwrap();
//! assert_eq!(id, 0);
//!
//! let entry = log.poll(Duration::from_millis(10)).unwrap().unwrap();
//! assert_eq!(entry.transaction_id, 0);
//! assert_eq!(&entry.payload[..], b"payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod log;
mod memory;
mod snapshot;

pub use error::{StorageError, StorageResult};
pub use file::{FileSnapshotLog, FileTransactionLog};
pub use log::{LogEntry, TransactionLog};
pub use memory::{MemorySnapshotLog, MemoryTransactionLog};
pub use snapshot::{SnapshotLog, SnapshotReader, SnapshotWriter};
