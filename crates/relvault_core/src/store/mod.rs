//! In-memory object graph.

mod entity;
mod graph;
mod relation;
mod undo;

pub(crate) use graph::{Graph, RelationEdit};
pub(crate) use undo::UndoLog;

#[cfg(test)]
pub(crate) use graph::attributes;
