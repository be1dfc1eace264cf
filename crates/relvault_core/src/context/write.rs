//! Mutating access for commands.

use super::ReadContext;
use crate::error::CoreResult;
use crate::instance::{Attributes, Instance};
use crate::schema::Schema;
use crate::store::{Graph, RelationEdit, UndoLog};
use relvault_codec::Value;
use std::mem;

/// The write side handed to a [`Command`](crate::Command).
///
/// Every mutation records its inverse. If any command of the transaction
/// fails, the engine unwinds all of them and the transaction leaves no
/// trace. A single mutation that fails leaves the graph as it found it.
pub struct WriteContext<'g> {
    graph: &'g mut Graph,
    undo: &'g mut UndoLog,
    unfinished: Vec<String>,
}

impl<'g> WriteContext<'g> {
    pub(crate) fn new(graph: &'g mut Graph, undo: &'g mut UndoLog) -> Self {
        Self {
            graph,
            undo,
            unfinished: Vec::new(),
        }
    }

    /// Builders dropped without being finished since this context was created.
    pub(crate) fn unfinished(&self) -> &[String] {
        &self.unfinished
    }

    /// Returns a read-only view including this transaction's changes so far.
    #[must_use]
    pub fn view(&self) -> ReadContext<'_> {
        ReadContext::new(self.graph)
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.graph.schema()
    }

    /// Starts a new instance of `entity`.
    ///
    /// The id is allocated now; the instance becomes visible on
    /// [`InstanceBuilder::insert`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared entity.
    pub fn create(&mut self, entity: &str) -> CoreResult<InstanceBuilder<'_, 'g>> {
        let entity = self.graph.schema().resolve_entity(entity)?.id();
        let mark = self.undo.mark();
        let instance = self.graph.allocate(entity, self.undo)?;
        Ok(InstanceBuilder {
            ctx: self,
            instance,
            attributes: Attributes::new(),
            relations: Vec::new(),
            mark,
            finished: false,
        })
    }

    /// Starts changing attributes of a live instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance is not live.
    pub fn update(&mut self, instance: Instance) -> CoreResult<UpdateBuilder<'_, 'g>> {
        self.graph.require(instance)?;
        Ok(UpdateBuilder {
            ctx: self,
            instance,
            changes: Vec::new(),
            finished: false,
        })
    }

    /// Deletes an instance and every relation edge touching it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance is not live.
    pub fn delete(&mut self, instance: Instance) -> CoreResult<()> {
        self.graph.delete(instance, self.undo)
    }

    /// Sets or clears a single-valued relation.
    ///
    /// # Errors
    ///
    /// Returns `NonNullConstraintViolation` when clearing a required
    /// relation, and `InvalidOperation` for a multi-valued one.
    pub fn set_related(
        &mut self,
        tail: Instance,
        relation: &str,
        head: Option<Instance>,
    ) -> CoreResult<()> {
        self.edit(tail, relation, RelationEdit::Set(head)).map(|_| ())
    }

    /// Adds one head to a multi-valued relation. Returns false if it was
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for dead instances and `TypeMismatch` for a head
    /// of the wrong entity.
    pub fn add_related(&mut self, tail: Instance, relation: &str, head: Instance) -> CoreResult<bool> {
        self.edit(tail, relation, RelationEdit::Add(vec![head]))
            .map(|n| n > 0)
    }

    /// Adds heads to a multi-valued relation. Returns how many were new.
    ///
    /// # Errors
    ///
    /// See [`add_related`](Self::add_related).
    pub fn add_all_related(
        &mut self,
        tail: Instance,
        relation: &str,
        heads: &[Instance],
    ) -> CoreResult<usize> {
        self.edit(tail, relation, RelationEdit::Add(heads.to_vec()))
    }

    /// Removes one head from a multi-valued relation. Returns false if it
    /// was not present.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead tail.
    pub fn remove_related(
        &mut self,
        tail: Instance,
        relation: &str,
        head: Instance,
    ) -> CoreResult<bool> {
        self.edit(tail, relation, RelationEdit::Remove(vec![head]))
            .map(|n| n > 0)
    }

    /// Removes heads from a multi-valued relation. Returns how many were present.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead tail.
    pub fn remove_all_related(
        &mut self,
        tail: Instance,
        relation: &str,
        heads: &[Instance],
    ) -> CoreResult<usize> {
        self.edit(tail, relation, RelationEdit::Remove(heads.to_vec()))
    }

    /// Replaces every head of a multi-valued relation.
    ///
    /// # Errors
    ///
    /// See [`add_related`](Self::add_related).
    pub fn replace_related(
        &mut self,
        tail: Instance,
        relation: &str,
        heads: &[Instance],
    ) -> CoreResult<()> {
        self.edit(tail, relation, RelationEdit::Replace(heads.to_vec()))
            .map(|_| ())
    }

    /// Removes every head of a multi-valued relation. Returns how many there were.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead tail.
    pub fn clear_related(&mut self, tail: Instance, relation: &str) -> CoreResult<usize> {
        self.edit(tail, relation, RelationEdit::Clear)
    }

    fn edit(&mut self, tail: Instance, relation: &str, edit: RelationEdit) -> CoreResult<usize> {
        self.graph.edit_relation(tail, relation, edit, self.undo)
    }
}

impl std::fmt::Debug for WriteContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteContext")
            .field("undo_len", &self.undo.len())
            .field("unfinished", &self.unfinished)
            .finish_non_exhaustive()
    }
}

/// Builds a new instance. Must end with [`insert`](Self::insert).
///
/// Dropping the builder without inserting is a contract violation: the
/// command's transaction is rolled back.
#[must_use = "an instance builder must be inserted"]
pub struct InstanceBuilder<'c, 'g> {
    ctx: &'c mut WriteContext<'g>,
    instance: Instance,
    attributes: Attributes,
    relations: Vec<(String, Vec<Instance>)>,
    mark: usize,
    finished: bool,
}

impl InstanceBuilder<'_, '_> {
    /// The handle the instance will have once inserted.
    #[must_use]
    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// Sets an attribute.
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    /// Points a relation at `head`. For a multi-valued relation, adds it.
    pub fn relate(mut self, relation: impl Into<String>, head: Instance) -> Self {
        self.heads_mut(relation.into()).push(head);
        self
    }

    /// Adds several heads to a multi-valued relation.
    pub fn relate_all(
        mut self,
        relation: impl Into<String>,
        heads: impl IntoIterator<Item = Instance>,
    ) -> Self {
        self.heads_mut(relation.into()).extend(heads);
        self
    }

    /// Validates and makes the instance visible.
    ///
    /// On error nothing is left behind, including the allocated id.
    ///
    /// # Errors
    ///
    /// Returns `NonNullConstraintViolation`, `UniqueConstraintViolation`,
    /// `TypeMismatch`, `UnknownMember` or `NotFound` for a dead head.
    pub fn insert(mut self) -> CoreResult<Instance> {
        self.finished = true;
        let attributes = mem::take(&mut self.attributes);
        let relations = mem::take(&mut self.relations);
        let ctx = &mut *self.ctx;
        match ctx
            .graph
            .insert(self.instance, attributes, relations, ctx.undo)
        {
            Ok(()) => Ok(self.instance),
            Err(err) => {
                ctx.graph.rollback_to(ctx.undo, self.mark);
                Err(err)
            }
        }
    }

    fn heads_mut(&mut self, relation: String) -> &mut Vec<Instance> {
        let index = match self.relations.iter().position(|(name, _)| *name == relation) {
            Some(index) => index,
            None => {
                self.relations.push((relation, Vec::new()));
                self.relations.len() - 1
            }
        };
        &mut self.relations[index].1
    }
}

impl Drop for InstanceBuilder<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            let entity = self.ctx.graph.schema().entity_name(self.instance.entity()).to_string();
            self.ctx
                .unfinished
                .push(format!("{entity} {} was created but never inserted", self.instance.id()));
        }
    }
}

/// Changes attributes of one instance. Must end with [`apply`](Self::apply).
///
/// Dropping the builder without applying is a contract violation.
#[must_use = "an update builder must be applied"]
pub struct UpdateBuilder<'c, 'g> {
    ctx: &'c mut WriteContext<'g>,
    instance: Instance,
    changes: Vec<(String, Value)>,
    finished: bool,
}

impl UpdateBuilder<'_, '_> {
    /// Queues an attribute change. `Value::Null` clears the attribute.
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.push((attribute.into(), value.into()));
        self
    }

    /// Applies the queued changes in order, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns the first constraint or type error; earlier changes of this
    /// builder are undone.
    pub fn apply(mut self) -> CoreResult<()> {
        self.finished = true;
        let changes = mem::take(&mut self.changes);
        let ctx = &mut *self.ctx;
        let mark = ctx.undo.mark();
        for (attribute, value) in changes {
            if let Err(err) = ctx.graph.update(self.instance, &attribute, value, ctx.undo) {
                ctx.graph.rollback_to(ctx.undo, mark);
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for UpdateBuilder<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            let entity = self.ctx.graph.schema().entity_name(self.instance.entity()).to_string();
            self.ctx
                .unfinished
                .push(format!("update of {entity} {} was never applied", self.instance.id()));
        }
    }
}
