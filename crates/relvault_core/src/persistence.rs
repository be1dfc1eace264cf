//! Bridge between the engine and the two storage providers.

use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::store::Graph;
use crate::wire::{SnapshotBundle, TransactionRecord};
use relvault_storage::{SnapshotLog, StorageError, TransactionLog};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An entry pulled from the log. The record fails to decode if it was
/// written by an incompatible build; the id is still consumed.
#[derive(Debug)]
pub(crate) struct Polled {
    pub(crate) transaction_id: u64,
    pub(crate) record: CoreResult<TransactionRecord>,
}

pub(crate) struct PersistenceCoordinator {
    store_name: String,
    log: Arc<dyn TransactionLog>,
    snapshots: Arc<dyn SnapshotLog>,
    model_version: u32,
    retained: Option<usize>,
}

impl PersistenceCoordinator {
    pub(crate) fn new(
        store_name: impl Into<String>,
        log: Arc<dyn TransactionLog>,
        snapshots: Arc<dyn SnapshotLog>,
        model_version: u32,
        retained: Option<usize>,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            log,
            snapshots,
            model_version,
            retained,
        }
    }

    /// Serializes and durably appends a transaction. Returns its id.
    pub(crate) fn append(&self, record: &TransactionRecord) -> CoreResult<u64> {
        let bytes = record.encode()?;
        Ok(self.log.append(&self.store_name, &bytes)?)
    }

    pub(crate) fn poll(&self, timeout: Duration) -> CoreResult<Option<Polled>> {
        Ok(self.log.poll(timeout)?.map(|entry| Polled {
            transaction_id: entry.transaction_id,
            record: TransactionRecord::decode(&entry.payload),
        }))
    }

    pub(crate) fn head(&self) -> CoreResult<Option<u64>> {
        Ok(self.log.head()?)
    }

    /// Loads the newest snapshot and positions the log just after it.
    ///
    /// Returns `None` for a store that has never been snapshotted.
    pub(crate) fn recover(&self, schema: &Arc<Schema>) -> CoreResult<Option<(u64, Graph)>> {
        let Some(latest) = self.snapshots.list()?.into_iter().max() else {
            info!(store = %self.store_name, "no snapshot found");
            return Ok(None);
        };

        let reader = self.snapshots.create_reader(latest)?;
        let bundle = SnapshotBundle::decode_from(reader)?;
        if bundle.transaction_id != latest {
            return Err(CoreError::recovery(format!(
                "snapshot listed as {latest} claims transaction {}",
                bundle.transaction_id
            )));
        }
        if bundle.model_version != self.model_version {
            return Err(CoreError::ModelVersionMismatch {
                expected: self.model_version,
                found: bundle.model_version,
            });
        }

        let graph = Graph::recover(Arc::clone(schema), bundle.entities)?;
        self.log.seek(latest)?;
        info!(store = %self.store_name, transaction_id = latest, "recovered from snapshot");
        Ok(Some((latest, graph)))
    }

    /// Writes a snapshot of `graph` as of `transaction_id`.
    ///
    /// Nothing becomes readable unless the whole bundle is written and
    /// committed.
    pub(crate) fn persist_snapshot(&self, transaction_id: u64, graph: &Graph) -> CoreResult<()> {
        let bundle = SnapshotBundle {
            model_version: self.model_version,
            transaction_id,
            entities: graph.fragments(),
        };
        let mut writer = self.snapshots.create_writer(transaction_id)?;
        bundle.encode_to(&mut writer)?;
        writer.flush()?;
        writer.commit()?;
        info!(store = %self.store_name, transaction_id, "snapshot written");
        Ok(())
    }

    /// Deletes snapshots beyond the retention count, oldest first.
    /// Returns how many were deleted.
    pub(crate) fn prune(&self) -> CoreResult<usize> {
        let Some(retained) = self.retained else {
            return Ok(0);
        };
        let ids = self.snapshots.list()?;
        let excess = ids.len().saturating_sub(retained.max(1));
        for id in &ids[..excess] {
            match self.snapshots.delete(*id) {
                Ok(()) | Err(StorageError::SnapshotNotFound { .. }) => {
                    debug!(store = %self.store_name, transaction_id = id, "snapshot pruned");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(excess)
    }
}

impl std::fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("store_name", &self.store_name)
            .field("model_version", &self.model_version)
            .field("retained", &self.retained)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Params;
    use crate::instance::Instance;
    use crate::schema::{DataType, EntitySpec};
    use crate::store::{attributes, UndoLog};
    use crate::types::CorrelationId;
    use crate::wire::CommandRecord;
    use relvault_storage::{MemorySnapshotLog, MemoryTransactionLog};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity(
                    EntitySpec::new("Person")
                        .identity("id")
                        .attribute("name", DataType::Text)
                        .unique("name"),
                )
                .build()
                .unwrap(),
        )
    }

    fn coordinator(
        log: &MemoryTransactionLog,
        snapshots: &MemorySnapshotLog,
        model_version: u32,
        retained: Option<usize>,
    ) -> PersistenceCoordinator {
        PersistenceCoordinator::new(
            "people",
            Arc::new(log.connect()),
            Arc::new(snapshots.clone()),
            model_version,
            retained,
        )
    }

    fn graph_with(names: &[&str]) -> Graph {
        let schema = schema();
        let person = schema.resolve_entity("Person").unwrap().id();
        let mut graph = Graph::new(schema);
        let mut undo = UndoLog::new();
        for name in names {
            let instance: Instance = graph.allocate(person, &mut undo).unwrap();
            graph
                .insert(instance, attributes([("name", *name)]), Vec::new(), &mut undo)
                .unwrap();
        }
        graph
    }

    #[test]
    fn append_then_poll() {
        let log = MemoryTransactionLog::new();
        let persistence = coordinator(&log, &MemorySnapshotLog::new(), 1, None);
        let record = TransactionRecord {
            correlation_id: CorrelationId::generate(),
            commands: vec![CommandRecord {
                name: "create".into(),
                params: Params::new().with("name", "Ann"),
            }],
        };

        assert_eq!(persistence.append(&record).unwrap(), 0);
        assert_eq!(persistence.head().unwrap(), Some(0));
        let polled = persistence.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(polled.transaction_id, 0);
        assert_eq!(polled.record.unwrap(), record);
        assert!(persistence.poll(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn foreign_entry_is_reported_not_fatal() {
        let log = MemoryTransactionLog::new();
        log.append("people", b"garbage").unwrap();
        let persistence = coordinator(&log, &MemorySnapshotLog::new(), 1, None);
        let polled = persistence.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(polled.transaction_id, 0);
        assert!(polled.record.is_err());
    }

    #[test]
    fn empty_store_recovers_nothing() {
        let log = MemoryTransactionLog::new();
        let persistence = coordinator(&log, &MemorySnapshotLog::new(), 1, None);
        assert!(persistence.recover(&schema()).unwrap().is_none());
    }

    #[test]
    fn recover_picks_latest_and_seeks_past_it() {
        let log = MemoryTransactionLog::new();
        for _ in 0..4 {
            log.append("people", b"x").unwrap();
        }
        let snapshots = MemorySnapshotLog::new();
        let writer = coordinator(&log, &snapshots, 1, None);
        writer.persist_snapshot(1, &graph_with(&["Ann"])).unwrap();
        writer.persist_snapshot(2, &graph_with(&["Ann", "Bob"])).unwrap();

        let reader = coordinator(&log, &snapshots, 1, None);
        let (id, graph) = reader.recover(&schema()).unwrap().unwrap();
        assert_eq!(id, 2);
        let person = graph.schema().resolve_entity("Person").unwrap().id();
        assert_eq!(graph.count(person).unwrap(), 2);

        let next = reader.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(next.transaction_id, 3);
    }

    #[test]
    fn model_version_mismatch_is_fatal() {
        let log = MemoryTransactionLog::new();
        let snapshots = MemorySnapshotLog::new();
        coordinator(&log, &snapshots, 1, None)
            .persist_snapshot(0, &graph_with(&[]))
            .unwrap();

        let err = coordinator(&log, &snapshots, 2, None)
            .recover(&schema())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ModelVersionMismatch {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn prune_keeps_newest() {
        let log = MemoryTransactionLog::new();
        let snapshots = MemorySnapshotLog::new();
        let persistence = coordinator(&log, &snapshots, 1, Some(2));
        let graph = graph_with(&["Ann"]);
        for id in 0..4 {
            persistence.persist_snapshot(id, &graph).unwrap();
        }

        assert_eq!(persistence.prune().unwrap(), 2);
        assert_eq!(snapshots.list().unwrap(), vec![2, 3]);
        assert_eq!(persistence.prune().unwrap(), 0);
    }

    #[test]
    fn prune_without_retention_keeps_all() {
        let log = MemoryTransactionLog::new();
        let snapshots = MemorySnapshotLog::new();
        let persistence = coordinator(&log, &snapshots, 1, None);
        persistence.persist_snapshot(0, &graph_with(&[])).unwrap();
        persistence.persist_snapshot(1, &graph_with(&[])).unwrap();
        assert_eq!(persistence.prune().unwrap(), 0);
        assert_eq!(snapshots.len(), 2);
    }
}
