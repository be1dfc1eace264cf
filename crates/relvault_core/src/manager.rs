//! Store lifecycle: open, submit, read, snapshot, close.

use crate::command::{CommandRegistry, Params};
use crate::commit_feed::CommitEvent;
use crate::config::StoreConfig;
use crate::context::ReadContext;
use crate::engine::{self, Shared, StoreState};
use crate::error::{CoreError, CoreResult};
use crate::future::{CommandFuture, TransactionFuture};
use crate::persistence::PersistenceCoordinator;
use crate::schema::Schema;
use crate::store::Graph;
use crate::types::{CorrelationId, TransactionId};
use crate::wire::{CommandRecord, TransactionRecord};
use parking_lot::Mutex;
use relvault_codec::Value;
use relvault_storage::{
    MemorySnapshotLog, MemoryTransactionLog, SnapshotLog, StorageError, TransactionLog,
};
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

type CloseHook = Box<dyn FnOnce(&str) + Send>;

/// Configures and opens a [`Store`].
#[must_use = "a store builder does nothing until opened"]
pub struct StoreBuilder {
    name: String,
    schema: Arc<Schema>,
    commands: CommandRegistry,
    log: Option<Arc<dyn TransactionLog>>,
    snapshots: Option<Arc<dyn SnapshotLog>>,
    config: StoreConfig,
    on_close: Option<CloseHook>,
}

impl StoreBuilder {
    /// Sets the commands this store can execute.
    pub fn commands(mut self, commands: CommandRegistry) -> Self {
        self.commands = commands;
        self
    }

    /// Sets the transaction log. Defaults to a fresh in-memory log.
    pub fn transaction_log(mut self, log: Arc<dyn TransactionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Sets the snapshot log. Defaults to a fresh in-memory log.
    pub fn snapshot_log(mut self, snapshots: Arc<dyn SnapshotLog>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a hook run once the store has closed, with the store name.
    pub fn on_close(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Recovers the store and blocks until the log backlog has executed.
    ///
    /// A store with no snapshot is bootstrapped with one empty transaction
    /// so it always has a version once open.
    ///
    /// # Errors
    ///
    /// Returns recovery errors (`Recovery`, `ModelVersionMismatch`, codec
    /// and storage errors), or `Timeout` if the backlog does not drain
    /// within `open_timeout`.
    pub fn open(self) -> CoreResult<Store> {
        let Self {
            name,
            schema,
            commands,
            log,
            snapshots,
            config,
            on_close,
        } = self;

        let log = log.unwrap_or_else(|| Arc::new(MemoryTransactionLog::new()));
        let snapshots = snapshots.unwrap_or_else(|| Arc::new(MemorySnapshotLog::new()));
        let persistence = PersistenceCoordinator::new(
            name.clone(),
            log,
            snapshots,
            config.model_version,
            config.retained_snapshots,
        );

        let (graph, current) = match persistence.recover(&schema)? {
            Some((id, graph)) => (graph, Some(TransactionId::new(id))),
            None => (Graph::new(Arc::clone(&schema)), None),
        };
        let shared = Arc::new(Shared::new(
            name,
            StoreState { graph, current },
            commands,
            persistence,
            config.poll_timeout,
        ));
        let consumer = engine::spawn(Arc::clone(&shared))?;

        let store = Store {
            shared,
            schema,
            config,
            consumer: Mutex::new(Some(consumer)),
            last_snapshot: Mutex::new(current),
            on_close: Mutex::new(on_close),
        };

        let bootstrap = current.is_none();
        if bootstrap {
            info!(store = %store.name(), "bootstrapping new store");
            let future = store.submit(Vec::new())?;
            drop(future);
        }

        store.sync(store.config.open_timeout)?;

        if bootstrap && store.config.snapshot_on_bootstrap {
            store.snapshot()?;
        }
        info!(
            store = %store.name(),
            current = ?store.current_transaction_id(),
            "store opened"
        );
        Ok(store)
    }
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("name", &self.name)
            .field("commands", &self.commands)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Collects commands into one transaction.
#[must_use = "a transaction builder does nothing until submitted"]
#[derive(Debug)]
pub struct TransactionBuilder<'s> {
    store: &'s Store,
    commands: Vec<CommandRecord>,
}

impl TransactionBuilder<'_> {
    /// Appends a command. Commands execute in the order they are added.
    pub fn command(mut self, name: impl Into<String>, params: Params) -> Self {
        self.commands.push(CommandRecord {
            name: name.into(),
            params,
        });
        self
    }

    /// Appends the transaction to the log without waiting for it to execute.
    ///
    /// # Errors
    ///
    /// See [`Store::submit`].
    pub fn submit(self) -> CoreResult<TransactionFuture> {
        self.store.submit(self.commands)
    }
}

/// An open store.
///
/// All writes go through commands appended to the transaction log and
/// executed by a single consumer thread; any number of threads may read
/// concurrently through [`read`](Self::read).
///
/// # Example
///
/// ```rust
/// use relvault_core::{CommandRegistry, DataType, EntitySpec, Params, Schema, Store, Value};
///
/// let schema = Schema::builder()
///     .entity(
///         EntitySpec::new("Person")
///             .identity("id")
///             .attribute("name", DataType::Text)
///             .unique("name"),
///     )
///     .build()
///     .unwrap();
///
/// let mut commands = CommandRegistry::new();
/// commands
///     .register_fn("create_person", |ctx, params| {
///         let person = ctx
///             .create("Person")?
///             .set("name", params.text("name")?)
///             .insert()?;
///         Ok(Value::from(person.id().as_u64() as i64))
///     })
///     .unwrap();
///
/// let store = Store::builder("people", schema).commands(commands).open().unwrap();
/// let id = store
///     .execute("create_person", Params::new().with("name", "Ann"))
///     .unwrap();
/// assert_eq!(id, Value::Integer(0));
/// assert_eq!(store.read(|ctx| ctx.count("Person")).unwrap(), 1);
/// store.close().unwrap();
/// ```
pub struct Store {
    shared: Arc<Shared>,
    schema: Arc<Schema>,
    config: StoreConfig,
    consumer: Mutex<Option<JoinHandle<()>>>,
    /// Also serializes concurrent `snapshot()` calls.
    last_snapshot: Mutex<Option<TransactionId>>,
    on_close: Mutex<Option<CloseHook>>,
}

impl Store {
    /// Starts configuring a store named `name` over `schema`.
    pub fn builder(name: impl Into<String>, schema: impl Into<Arc<Schema>>) -> StoreBuilder {
        StoreBuilder {
            name: name.into(),
            schema: schema.into(),
            commands: CommandRegistry::new(),
            log: None,
            snapshots: None,
            config: StoreConfig::default(),
            on_close: None,
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the registered commands.
    #[must_use]
    pub fn commands(&self) -> &CommandRegistry {
        &self.shared.commands
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_running()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }

    /// Appends a transaction and returns immediately.
    ///
    /// The future resolves once the consumer has executed the transaction.
    /// Names are checked against the registry here so typos fail fast;
    /// everything else is decided at execution.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed`, `UnknownCommand`, or the error of the log
    /// append.
    pub fn submit(&self, commands: Vec<CommandRecord>) -> CoreResult<TransactionFuture> {
        self.ensure_open()?;
        if let Some(unknown) = commands
            .iter()
            .find(|c| !self.shared.commands.contains(&c.name))
        {
            return Err(CoreError::UnknownCommand {
                name: unknown.name.clone(),
            });
        }

        let correlation_id = CorrelationId::generate();
        let receiver = self.shared.pending.register(correlation_id);
        let future =
            TransactionFuture::new(correlation_id, receiver, Arc::clone(&self.shared.pending));
        let record = TransactionRecord {
            correlation_id,
            commands,
        };
        let transaction_id = self.shared.persistence.append(&record)?;
        debug!(
            store = %self.name(),
            transaction_id,
            %correlation_id,
            "transaction appended"
        );
        Ok(future)
    }

    /// Starts a multi-command transaction.
    pub fn transaction(&self) -> TransactionBuilder<'_> {
        TransactionBuilder {
            store: self,
            commands: Vec::new(),
        }
    }

    /// Submits a single command as its own transaction.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_command(&self, name: impl Into<String>, params: Params) -> CoreResult<CommandFuture> {
        let future = self.transaction().command(name, params).submit()?;
        Ok(CommandFuture::new(future, 0))
    }

    /// Submits a single command and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the submit error or the error that rolled the command back.
    pub fn execute(&self, name: impl Into<String>, params: Params) -> CoreResult<Value> {
        self.submit_command(name, params)?.wait()
    }

    /// Runs `f` against a consistent view under the shared lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after close, or whatever `f` returns.
    pub fn read<R>(&self, f: impl FnOnce(ReadContext<'_>) -> CoreResult<R>) -> CoreResult<R> {
        self.ensure_open()?;
        let state = self.shared.state.read();
        f(ReadContext::new(&state.graph))
    }

    /// Id of the last committed transaction.
    #[must_use]
    pub fn current_transaction_id(&self) -> Option<TransactionId> {
        self.shared.state.read().current
    }

    /// Id of the last snapshot written or recovered by this handle.
    #[must_use]
    pub fn last_snapshot_transaction_id(&self) -> Option<TransactionId> {
        *self.last_snapshot.lock()
    }

    /// Subscribes to executed transactions, in log order.
    pub fn subscribe(&self) -> Receiver<CommitEvent> {
        self.shared.feed.subscribe()
    }

    /// Blocks until every transaction appended to the log so far, by any
    /// handle, has executed here.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the consumer does not catch up in time.
    pub fn sync(&self, timeout: Duration) -> CoreResult<()> {
        self.ensure_open()?;
        let Some(head) = self.shared.persistence.head()? else {
            return Ok(());
        };
        if self.shared.progress.wait_for(head, timeout) {
            Ok(())
        } else {
            Err(CoreError::timeout(format!(
                "store {} did not reach transaction {head} within {timeout:?}",
                self.name()
            )))
        }
    }

    /// Snapshots the current state if anything committed since the last
    /// snapshot. Returns the snapshot's transaction id, or `None` if there
    /// was nothing new.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` or the snapshot provider's error.
    pub fn snapshot(&self) -> CoreResult<Option<TransactionId>> {
        self.ensure_open()?;
        let mut last = self.last_snapshot.lock();
        let state = self.shared.state.read();
        let Some(current) = state.current else {
            return Ok(None);
        };
        if last.is_some_and(|last| current <= last) {
            return Ok(None);
        }

        match self
            .shared
            .persistence
            .persist_snapshot(current.as_u64(), &state.graph)
        {
            Ok(()) => {}
            Err(CoreError::Storage(StorageError::SnapshotExists { .. })) => {
                debug!(store = %self.name(), transaction_id = current.as_u64(), "snapshot already present");
            }
            Err(err) => return Err(err),
        }
        drop(state);
        *last = Some(current);

        if let Err(err) = self.shared.persistence.prune() {
            warn!(store = %self.name(), error = %err, "snapshot pruning failed");
        }
        Ok(Some(current))
    }

    /// Stops the consumer, fails pending futures with `StoreClosed` and
    /// runs the close hook. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Currently always succeeds.
    pub fn close(&self) -> CoreResult<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(consumer) = self.consumer.lock().take() {
            if consumer.join().is_err() {
                warn!(store = %self.name(), "consumer thread panicked");
            }
        }
        let failed = self.shared.pending.fail_all();
        if let Some(hook) = self.on_close.lock().take() {
            hook(self.name());
        }
        info!(store = %self.name(), pending_failed = failed, "store closed");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name())
            .field("is_open", &self.is_open())
            .field("current", &self.current_transaction_id())
            .field("last_snapshot", &self.last_snapshot_transaction_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, EntitySpec};
    use std::sync::atomic::AtomicUsize;

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntitySpec::new("Person")
                    .identity("id")
                    .attribute("name", DataType::Text)
                    .unique("name"),
            )
            .build()
            .unwrap()
    }

    fn commands() -> CommandRegistry {
        let mut commands = CommandRegistry::new();
        commands
            .register_fn("create", |ctx, params| {
                ctx.create("Person")?
                    .set("name", params.text("name")?)
                    .insert()?;
                Ok(Value::Null)
            })
            .unwrap();
        commands
    }

    fn open(log: &MemoryTransactionLog, snapshots: &MemorySnapshotLog) -> Store {
        Store::builder("people", schema())
            .commands(commands())
            .transaction_log(Arc::new(log.connect()))
            .snapshot_log(Arc::new(snapshots.clone()))
            .open()
            .unwrap()
    }

    fn create(name: &str) -> Params {
        Params::new().with("name", name)
    }

    #[test]
    fn new_store_is_bootstrapped_and_snapshotted() {
        let snapshots = MemorySnapshotLog::new();
        let store = open(&MemoryTransactionLog::new(), &snapshots);
        assert_eq!(store.current_transaction_id(), Some(TransactionId::new(0)));
        assert_eq!(store.last_snapshot_transaction_id(), Some(TransactionId::new(0)));
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn bootstrap_snapshot_can_be_disabled() {
        let snapshots = MemorySnapshotLog::new();
        let store = Store::builder("people", schema())
            .snapshot_log(Arc::new(snapshots.clone()))
            .config(StoreConfig::new().snapshot_on_bootstrap(false))
            .open()
            .unwrap();
        assert_eq!(store.current_transaction_id(), Some(TransactionId::new(0)));
        assert!(snapshots.is_empty());
        assert_eq!(store.snapshot().unwrap(), Some(TransactionId::new(0)));
    }

    #[test]
    fn snapshot_is_idempotent() {
        let store = open(&MemoryTransactionLog::new(), &MemorySnapshotLog::new());
        assert_eq!(store.snapshot().unwrap(), None);

        store.execute("create", create("Ann")).unwrap();
        assert_eq!(store.snapshot().unwrap(), Some(TransactionId::new(1)));
        assert_eq!(store.snapshot().unwrap(), None);
    }

    #[test]
    fn unknown_command_fails_at_submit() {
        let store = open(&MemoryTransactionLog::new(), &MemorySnapshotLog::new());
        assert!(matches!(
            store.submit_command("nope", Params::new()),
            Err(CoreError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn reopen_recovers_snapshot_and_replays_tail() {
        let log = MemoryTransactionLog::new();
        let snapshots = MemorySnapshotLog::new();
        {
            let store = open(&log, &snapshots);
            store.execute("create", create("Ann")).unwrap();
            store.snapshot().unwrap();
            store.execute("create", create("Bob")).unwrap();
        }

        let store = open(&log, &snapshots);
        assert_eq!(store.last_snapshot_transaction_id(), Some(TransactionId::new(1)));
        assert_eq!(store.current_transaction_id(), Some(TransactionId::new(2)));
        assert_eq!(store.read(|ctx| ctx.count("Person")).unwrap(), 2);
    }

    #[test]
    fn second_handle_catches_up_with_sync() {
        let log = MemoryTransactionLog::new();
        let snapshots = MemorySnapshotLog::new();
        let writer = open(&log, &snapshots);
        let reader = open(&log, &snapshots);

        writer.execute("create", create("Ann")).unwrap();
        reader.sync(Duration::from_secs(5)).unwrap();
        assert!(reader
            .read(|ctx| ctx.get_by_unique("Person", "name", "Ann"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn close_is_idempotent_and_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = Store::builder("people", schema())
            .on_close(move |name| {
                assert_eq!(name, "people");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .open()
            .unwrap();

        store.close().unwrap();
        store.close().unwrap();
        drop(store);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_store_rejects_work() {
        let store = open(&MemoryTransactionLog::new(), &MemorySnapshotLog::new());
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(
            store.submit_command("create", create("Ann")),
            Err(CoreError::StoreClosed)
        ));
        assert!(matches!(store.snapshot(), Err(CoreError::StoreClosed)));
        assert!(matches!(
            store.read(|ctx| ctx.count("Person")),
            Err(CoreError::StoreClosed)
        ));
    }
}
