//! Feed of executed transactions.
//!
//! Every transaction the consumer executes, committed or rolled back, is
//! published in log order to all subscribers. Subscribers that hang up are
//! dropped on the next emit.
//!
//! ```rust,ignore
//! let events = store.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{} committed={}", event.transaction_id, event.committed);
//!     }
//! });
//! ```

use crate::types::{CorrelationId, TransactionId};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// One executed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    /// Id assigned by the log.
    pub transaction_id: TransactionId,
    /// Correlation id of the submitting future.
    pub correlation_id: CorrelationId,
    /// False if the transaction was rolled back.
    pub committed: bool,
    /// Rendered error of a rolled-back transaction.
    pub error: Option<String>,
}

/// Distributes commit events to subscribers.
#[derive(Debug, Default)]
pub(crate) struct CommitFeed {
    subscribers: RwLock<Vec<Sender<CommitEvent>>>,
}

impl CommitFeed {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self) -> Receiver<CommitEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: &CommitEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, committed: bool) -> CommitEvent {
        CommitEvent {
            transaction_id: TransactionId::new(id),
            correlation_id: CorrelationId::generate(),
            committed,
            error: None,
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = CommitFeed::new();
        let rx = feed.subscribe();
        feed.emit(&event(0, true));
        feed.emit(&event(1, false));

        assert_eq!(rx.recv().unwrap().transaction_id, TransactionId::new(0));
        let second = rx.recv().unwrap();
        assert_eq!(second.transaction_id, TransactionId::new(1));
        assert!(!second.committed);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let feed = CommitFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        drop(rx1);
        feed.emit(&event(0, true));
        assert_eq!(feed.subscriber_count(), 1);
        assert!(rx2.try_recv().is_ok());
    }
}
