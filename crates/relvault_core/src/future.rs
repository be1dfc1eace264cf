//! Pending results of submitted transactions.
//!
//! A slot is registered under the transaction's correlation id before the
//! transaction is appended, and removed exactly once: when the consumer
//! completes it, when the caller cancels or drops the future, or when the
//! store closes. Nothing depends on reachability.

use crate::error::{CoreError, CoreResult};
use crate::types::{CorrelationId, TransactionId};
use parking_lot::Mutex;
use relvault_codec::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

type Slot = Sender<CoreResult<TransactionReceipt>>;

/// Outcome of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Id assigned by the log; the store's version after the commit.
    pub transaction_id: TransactionId,
    /// One result per command, in submission order.
    pub results: Vec<Value>,
}

/// Correlation id → pending slot.
#[derive(Debug, Default)]
pub(crate) struct PendingRegistry {
    slots: Mutex<HashMap<CorrelationId, Slot>>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, correlation_id: CorrelationId) -> Receiver<CoreResult<TransactionReceipt>> {
        let (tx, rx) = mpsc::channel();
        self.slots.lock().insert(correlation_id, tx);
        rx
    }

    /// Completes and removes a slot. Returns false if nobody was waiting,
    /// which is normal for transactions submitted by another handle.
    pub(crate) fn complete(
        &self,
        correlation_id: &CorrelationId,
        result: CoreResult<TransactionReceipt>,
    ) -> bool {
        match self.slots.lock().remove(correlation_id) {
            Some(slot) => slot.send(result).is_ok(),
            None => false,
        }
    }

    pub(crate) fn cancel(&self, correlation_id: &CorrelationId) {
        self.slots.lock().remove(correlation_id);
    }

    /// Fails every pending slot with `StoreClosed`.
    pub(crate) fn fail_all(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let count = slots.len();
        for slot in slots {
            let _ = slot.send(Err(CoreError::StoreClosed));
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Handle to the eventual outcome of a submitted transaction.
///
/// Dropping or cancelling the future only stops waiting: the transaction
/// is already in the log and will execute regardless.
#[must_use = "a transaction future does nothing unless waited on"]
pub struct TransactionFuture {
    correlation_id: CorrelationId,
    receiver: Receiver<CoreResult<TransactionReceipt>>,
    registry: Arc<PendingRegistry>,
}

impl TransactionFuture {
    pub(crate) fn new(
        correlation_id: CorrelationId,
        receiver: Receiver<CoreResult<TransactionReceipt>>,
        registry: Arc<PendingRegistry>,
    ) -> Self {
        Self {
            correlation_id,
            receiver,
            registry,
        }
    }

    /// The id matching this future to its log entry.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Blocks until the transaction has executed.
    ///
    /// # Errors
    ///
    /// Returns the error that rolled the transaction back, or
    /// `StoreClosed` if the store closed first.
    pub fn wait(self) -> CoreResult<TransactionReceipt> {
        self.receiver.recv().unwrap_or(Err(CoreError::StoreClosed))
    }

    /// Waits at most `timeout`. On timeout the future is handed back so the
    /// caller can keep waiting or cancel.
    ///
    /// # Errors
    ///
    /// The outer `Err` carries the still-pending future.
    pub fn wait_timeout(self, timeout: Duration) -> Result<CoreResult<TransactionReceipt>, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(CoreError::StoreClosed)),
        }
    }

    /// Returns the outcome if it is already available.
    pub fn try_result(&self) -> Option<CoreResult<TransactionReceipt>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(CoreError::StoreClosed)),
        }
    }

    /// Stops waiting. Returns `Cancelled` so callers can propagate it.
    ///
    /// # Errors
    ///
    /// Always returns `CoreError::Cancelled`.
    pub fn cancel(self) -> CoreResult<TransactionReceipt> {
        self.registry.cancel(&self.correlation_id);
        Err(CoreError::Cancelled)
    }
}

impl Drop for TransactionFuture {
    fn drop(&mut self) {
        self.registry.cancel(&self.correlation_id);
    }
}

impl std::fmt::Debug for TransactionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFuture")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

/// Handle to the result of one command submitted on its own.
///
/// Owns the transaction future, so the pending slot lives exactly as long
/// as this handle.
#[derive(Debug)]
#[must_use = "a command future does nothing unless waited on"]
pub struct CommandFuture {
    transaction: TransactionFuture,
    index: usize,
}

impl CommandFuture {
    pub(crate) fn new(transaction: TransactionFuture, index: usize) -> Self {
        Self { transaction, index }
    }

    /// The id matching this future to its log entry.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.transaction.correlation_id()
    }

    /// Blocks until the command's transaction has executed.
    ///
    /// # Errors
    ///
    /// Returns the error that rolled the transaction back, or
    /// `StoreClosed` if the store closed first.
    pub fn wait(self) -> CoreResult<Value> {
        let index = self.index;
        self.transaction.wait().and_then(|receipt| pick(receipt, index))
    }

    /// Waits at most `timeout`, handing the future back on timeout.
    ///
    /// # Errors
    ///
    /// The outer `Err` carries the still-pending future.
    pub fn wait_timeout(self, timeout: Duration) -> Result<CoreResult<Value>, Self> {
        let index = self.index;
        match self.transaction.wait_timeout(timeout) {
            Ok(result) => Ok(result.and_then(|receipt| pick(receipt, index))),
            Err(transaction) => Err(Self { transaction, index }),
        }
    }

    /// Stops waiting.
    ///
    /// # Errors
    ///
    /// Always returns `CoreError::Cancelled`.
    pub fn cancel(self) -> CoreResult<Value> {
        self.transaction.cancel().map(|_| Value::Null)
    }
}

fn pick(receipt: TransactionReceipt, index: usize) -> CoreResult<Value> {
    receipt.results.into_iter().nth(index).ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "transaction {} has no result at index {index}",
            receipt.transaction_id
        ))
    })
}
