//! Inverse actions recorded while a transaction runs.

use crate::instance::Attributes;
use crate::types::{EntityTypeId, RelationTypeId};
use relvault_codec::Value;

/// The compensating mutation for one forward mutation.
///
/// Unwinding never fails: each action restores state that the forward
/// mutation displaced, and actions are applied strictly in reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UndoAction {
    /// Give back an allocated id.
    Release { entity: EntityTypeId, id: u64 },
    /// Remove an inserted instance and its outgoing edges.
    Uninsert { entity: EntityTypeId, id: u64 },
    /// Put a deleted instance back under the same id.
    Reinsert {
        entity: EntityTypeId,
        id: u64,
        attributes: Attributes,
    },
    /// Re-apply the previous value of an attribute.
    RestoreAttribute {
        entity: EntityTypeId,
        id: u64,
        attribute: String,
        previous: Value,
    },
    /// Set the heads of `tail` back to exactly `heads`.
    RestoreHeads {
        relation: RelationTypeId,
        tail: u64,
        heads: Vec<u64>,
    },
    /// Remove edges that were added.
    Unlink {
        relation: RelationTypeId,
        tail: u64,
        heads: Vec<u64>,
    },
    /// Add back edges that were removed.
    Relink {
        relation: RelationTypeId,
        tail: u64,
        heads: Vec<u64>,
    },
}

/// Ordered inverse actions of the running transaction.
#[derive(Debug, Default)]
pub(crate) struct UndoLog {
    actions: Vec<UndoAction>,
}

impl UndoLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    /// Position to roll back to with [`split_off`](Self::split_off).
    pub(crate) fn mark(&self) -> usize {
        self.actions.len()
    }

    /// Removes and returns every action recorded after `mark`, newest first.
    pub(crate) fn split_off(&mut self, mark: usize) -> Vec<UndoAction> {
        let mut tail = self.actions.split_off(mark.min(self.actions.len()));
        tail.reverse();
        tail
    }

    /// Removes and returns every action, newest first.
    pub(crate) fn drain(&mut self) -> Vec<UndoAction> {
        self.split_off(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}
