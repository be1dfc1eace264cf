//! The consumer loop: the only writer of a store.
//!
//! One dedicated thread polls the log and executes each transaction under
//! the exclusive side of the state lock, so readers see a transaction
//! entirely or not at all. A failed command unwinds every effect of its
//! transaction before the lock is released.

use crate::command::CommandRegistry;
use crate::commit_feed::{CommitEvent, CommitFeed};
use crate::context::WriteContext;
use crate::error::{CoreError, CoreResult};
use crate::future::{PendingRegistry, TransactionReceipt};
use crate::persistence::{PersistenceCoordinator, Polled};
use crate::store::{Graph, UndoLog};
use crate::types::TransactionId;
use crate::wire::CommandRecord;
use parking_lot::{Condvar, Mutex, RwLock};
use relvault_codec::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Everything guarded by the store's read/write lock.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) graph: Graph,
    /// Last committed transaction.
    pub(crate) current: Option<TransactionId>,
}

/// Highest log id the consumer has handled, committed or not.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    processed: Mutex<Option<u64>>,
    advanced: Condvar,
}

impl Progress {
    pub(crate) fn new(start: Option<u64>) -> Self {
        Self {
            processed: Mutex::new(start),
            advanced: Condvar::new(),
        }
    }

    pub(crate) fn processed(&self) -> Option<u64> {
        *self.processed.lock()
    }

    fn advance(&self, transaction_id: u64) {
        let mut processed = self.processed.lock();
        if processed.map_or(true, |p| transaction_id > p) {
            *processed = Some(transaction_id);
        }
        self.advanced.notify_all();
    }

    /// Waits until `target` has been handled. Returns false on timeout.
    pub(crate) fn wait_for(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut processed = self.processed.lock();
        while processed.map_or(true, |p| p < target) {
            if self
                .advanced
                .wait_until(&mut processed, deadline)
                .timed_out()
            {
                return processed.is_some_and(|p| p >= target);
            }
        }
        true
    }
}

/// State shared by the store handle and its consumer thread.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) state: RwLock<StoreState>,
    pub(crate) commands: CommandRegistry,
    pub(crate) persistence: PersistenceCoordinator,
    pub(crate) pending: Arc<PendingRegistry>,
    pub(crate) feed: CommitFeed,
    pub(crate) progress: Progress,
    pub(crate) running: AtomicBool,
    pub(crate) poll_timeout: Duration,
}

impl Shared {
    pub(crate) fn new(
        name: String,
        state: StoreState,
        commands: CommandRegistry,
        persistence: PersistenceCoordinator,
        poll_timeout: Duration,
    ) -> Self {
        let progress = Progress::new(state.current.map(TransactionId::as_u64));
        Self {
            name,
            state: RwLock::new(state),
            commands,
            persistence,
            pending: Arc::new(PendingRegistry::new()),
            feed: CommitFeed::new(),
            progress,
            running: AtomicBool::new(true),
            poll_timeout,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Executes one log entry and publishes its outcome.
    pub(crate) fn process(&self, polled: Polled) {
        let Polled {
            transaction_id,
            record,
        } = polled;
        if self
            .progress
            .processed()
            .is_some_and(|processed| transaction_id <= processed)
        {
            debug!(store = %self.name, transaction_id, "skipping already applied entry");
            return;
        }

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                error!(store = %self.name, transaction_id, error = %err, "undecodable log entry skipped");
                self.progress.advance(transaction_id);
                return;
            }
        };

        let id = TransactionId::new(transaction_id);
        let outcome = {
            let mut state = self.state.write();
            let outcome = execute(&self.commands, &mut state.graph, &record.commands);
            if outcome.is_ok() {
                state.current = Some(id);
            }
            outcome
        };

        let event = CommitEvent {
            transaction_id: id,
            correlation_id: record.correlation_id,
            committed: outcome.is_ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        match &outcome {
            Ok(_) => debug!(
                store = %self.name,
                transaction_id,
                commands = record.commands.len(),
                "transaction committed"
            ),
            Err(err) => warn!(
                store = %self.name,
                transaction_id,
                error = %err,
                "transaction rolled back"
            ),
        }

        let result = outcome.map(|results| TransactionReceipt {
            transaction_id: id,
            results,
        });
        self.pending.complete(&record.correlation_id, result);
        self.feed.emit(&event);
        self.progress.advance(transaction_id);
    }

    fn run(&self) {
        debug!(store = %self.name, "consumer started");
        while self.is_running() {
            match self.persistence.poll(self.poll_timeout) {
                Ok(Some(polled)) => self.process(polled),
                Ok(None) => {}
                Err(err) => {
                    error!(store = %self.name, error = %err, "log poll failed");
                    thread::sleep(self.poll_timeout);
                }
            }
        }
        debug!(store = %self.name, "consumer stopped");
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("processed", &self.progress.processed())
            .finish_non_exhaustive()
    }
}

/// Starts the consumer thread.
pub(crate) fn spawn(shared: Arc<Shared>) -> CoreResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("relvault-{}", shared.name))
        .spawn(move || shared.run())?;
    Ok(handle)
}

/// Runs every command of a transaction in order. On the first error the
/// graph is restored to its state before the transaction.
fn execute(
    commands: &CommandRegistry,
    graph: &mut Graph,
    records: &[CommandRecord],
) -> CoreResult<Vec<Value>> {
    let mut undo = UndoLog::new();
    let mut results = Vec::with_capacity(records.len());
    for record in records {
        match run_command(commands, graph, &mut undo, record) {
            Ok(value) => results.push(value),
            Err(err) => {
                graph.unwind(undo.drain());
                return Err(err);
            }
        }
    }
    Ok(results)
}

fn run_command(
    commands: &CommandRegistry,
    graph: &mut Graph,
    undo: &mut UndoLog,
    record: &CommandRecord,
) -> CoreResult<Value> {
    let command = commands
        .get(&record.name)
        .ok_or_else(|| CoreError::UnknownCommand {
            name: record.name.clone(),
        })?;

    let mut ctx = WriteContext::new(graph, undo);
    let value = panic::catch_unwind(AssertUnwindSafe(|| {
        command.execute(&mut ctx, &record.params)
    }))
    .unwrap_or_else(|payload| {
        Err(CoreError::command(format!(
            "command {} panicked: {}",
            record.name,
            panic_message(payload.as_ref())
        )))
    })?;

    if !ctx.unfinished().is_empty() {
        let message = ctx.unfinished().join("; ");
        warn!(command = %record.name, %message, "command left a builder unfinished");
        return Err(CoreError::CommandContractViolation {
            command: record.name.clone(),
            message,
        });
    }
    Ok(value)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
