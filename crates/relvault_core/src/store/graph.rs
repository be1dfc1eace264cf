//! The object graph: every entity store and relation store of one schema.
//!
//! Cross-store work lives here: cascading deletes, validating relation
//! heads, unwinding undo logs, and building or recovering snapshot
//! fragments.

use super::entity::EntityStore;
use super::relation::RelationStore;
use super::undo::{UndoAction, UndoLog};
use crate::error::{CoreError, CoreResult};
use crate::instance::{Attributes, Instance};
use crate::schema::{Cardinality, EntityDef, RelationDef, Schema};
use crate::types::{EntityTypeId, InstanceId, RelationTypeId};
use crate::wire::{AttributeDescriptor, EntityFragment, InstanceRecord, RelationDescriptor};
use relvault_codec::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// A mutation of one relation of one tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelationEdit {
    /// Single-valued: set or clear the head.
    Set(Option<Instance>),
    /// Multi-valued: add heads.
    Add(Vec<Instance>),
    /// Multi-valued: remove heads.
    Remove(Vec<Instance>),
    /// Multi-valued: replace all heads.
    Replace(Vec<Instance>),
    /// Multi-valued: remove all heads.
    Clear,
}

#[derive(Debug, Clone)]
pub(crate) struct Graph {
    schema: Arc<Schema>,
    entities: Vec<EntityStore>,
    relations: Vec<RelationStore>,
}

impl Graph {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let entities = schema.entities().iter().map(EntityStore::new).collect();
        let relations = schema
            .relations()
            .iter()
            .map(|r| RelationStore::new(r.cardinality.is_multi()))
            .collect();
        Self {
            schema,
            entities,
            relations,
        }
    }

    pub(crate) fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn store(&self, entity: EntityTypeId) -> CoreResult<&EntityStore> {
        self.entities
            .get(entity.index())
            .ok_or_else(|| CoreError::unknown_member("schema", format!("entity #{}", entity.0)))
    }

    fn relation_store(&self, relation: RelationTypeId) -> Option<&RelationStore> {
        self.relations.get(relation.index())
    }

    fn relation_store_mut(&mut self, relation: RelationTypeId) -> Option<&mut RelationStore> {
        self.relations.get_mut(relation.index())
    }

    // ---- reads ----

    pub(crate) fn exists(&self, instance: Instance) -> bool {
        self.store(instance.entity())
            .is_ok_and(|store| store.contains(instance.id().as_u64()))
    }

    pub(crate) fn require(&self, instance: Instance) -> CoreResult<()> {
        if self.exists(instance) {
            Ok(())
        } else {
            Err(CoreError::not_found(format!(
                "{} {}",
                self.schema.entity_name(instance.entity()),
                instance.id()
            )))
        }
    }

    pub(crate) fn attributes(&self, instance: Instance) -> CoreResult<&Attributes> {
        self.store(instance.entity())?
            .get(instance.id().as_u64())
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "{} {}",
                    self.schema.entity_name(instance.entity()),
                    instance.id()
                ))
            })
    }

    pub(crate) fn list(&self, entity: EntityTypeId) -> CoreResult<Vec<Instance>> {
        Ok(self
            .store(entity)?
            .ids()
            .map(|id| Instance::new(entity, InstanceId::new(id)))
            .collect())
    }

    pub(crate) fn count(&self, entity: EntityTypeId) -> CoreResult<usize> {
        Ok(self.store(entity)?.len())
    }

    pub(crate) fn next_id(&self, entity: EntityTypeId) -> CoreResult<u64> {
        Ok(self.store(entity)?.next_id())
    }

    pub(crate) fn find_unique(
        &self,
        entity: EntityTypeId,
        attribute: &str,
        value: &Value,
    ) -> CoreResult<Option<Instance>> {
        let def = self.schema.entity_def(entity)?;
        def.require_attribute(attribute)?;
        if !def.is_unique(attribute) {
            return Err(CoreError::invalid_operation(format!(
                "{}.{attribute} is not unique",
                def.name()
            )));
        }
        Ok(self
            .store(entity)?
            .find_unique(attribute, value)
            .map(|id| Instance::new(entity, InstanceId::new(id))))
    }

    /// Heads of `tail` for a relation it owns, ascending.
    pub(crate) fn heads(&self, tail: Instance, relation: &RelationDef) -> Vec<Instance> {
        self.relation_store(relation.id)
            .map(|store| store.heads(tail.id().as_u64()))
            .unwrap_or_default()
            .into_iter()
            .map(|id| Instance::new(relation.head, InstanceId::new(id)))
            .collect()
    }

    /// Tails pointing at `head` through a relation, ascending.
    pub(crate) fn tails(&self, head: Instance, relation: &RelationDef) -> Vec<Instance> {
        self.relation_store(relation.id)
            .map(|store| store.tails(head.id().as_u64()))
            .unwrap_or_default()
            .into_iter()
            .map(|id| Instance::new(relation.tail, InstanceId::new(id)))
            .collect()
    }

    // ---- writes ----

    /// Reserves the next id of `entity`.
    pub(crate) fn allocate(&mut self, entity: EntityTypeId, undo: &mut UndoLog) -> CoreResult<Instance> {
        self.schema.entity_def(entity)?;
        let store = self
            .entities
            .get_mut(entity.index())
            .ok_or_else(|| CoreError::unknown_member("schema", format!("entity #{}", entity.0)))?;
        let (id, action) = store.allocate();
        undo.push(action);
        Ok(Instance::new(entity, InstanceId::new(id)))
    }

    /// Makes an allocated instance visible with its attributes and initial relations.
    pub(crate) fn insert(
        &mut self,
        instance: Instance,
        attributes: Attributes,
        relations: Vec<(String, Vec<Instance>)>,
        undo: &mut UndoLog,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let def = schema.entity_def(instance.entity())?;

        let mut edges = Vec::with_capacity(relations.len());
        for (name, heads) in relations {
            let relation = schema.resolve_relation(def.id(), &name)?;
            if !relation.cardinality.is_multi() && heads.len() > 1 {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{name} holds at most one instance",
                    def.name()
                )));
            }
            self.check_heads(relation, &heads)?;
            edges.push((relation.id, heads));
        }
        for relation in def.relations() {
            let relation = schema.relation_def(*relation)?;
            let set = edges
                .iter()
                .any(|(id, heads)| *id == relation.id && !heads.is_empty());
            if relation.cardinality.is_required() && !set {
                return Err(non_null(def, &relation.name));
            }
        }

        let id = instance.id().as_u64();
        let store = self
            .entities
            .get_mut(def.id().index())
            .ok_or_else(|| CoreError::unknown_member("schema", def.name()))?;
        undo.push(store.insert(def, id, attributes)?);

        for (relation, heads) in edges {
            let ids: Vec<u64> = heads.iter().map(|h| h.id().as_u64()).collect();
            if let Some(store) = self.relation_store_mut(relation) {
                store.link(id, &ids);
            }
        }
        Ok(())
    }

    /// Changes one attribute of a live instance.
    pub(crate) fn update(
        &mut self,
        instance: Instance,
        attribute: &str,
        value: Value,
        undo: &mut UndoLog,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let def = schema.entity_def(instance.entity())?;
        let store = self
            .entities
            .get_mut(def.id().index())
            .ok_or_else(|| CoreError::unknown_member("schema", def.name()))?;
        undo.push(store.update(def, instance.id().as_u64(), attribute, value)?);
        Ok(())
    }

    /// Deletes an instance, cascading through every relation it takes part in.
    pub(crate) fn delete(&mut self, instance: Instance, undo: &mut UndoLog) -> CoreResult<()> {
        self.require(instance)?;
        let schema = Arc::clone(&self.schema);
        let id = instance.id().as_u64();

        for relation in schema.relations() {
            let Some(store) = self.relation_store_mut(relation.id) else {
                continue;
            };
            if relation.tail == instance.entity() {
                let heads = store.delete_tail(id);
                if !heads.is_empty() {
                    undo.push(UndoAction::RestoreHeads {
                        relation: relation.id,
                        tail: id,
                        heads,
                    });
                }
            }
            if relation.head == instance.entity() {
                for tail in store.delete_head(id) {
                    undo.push(UndoAction::Relink {
                        relation: relation.id,
                        tail,
                        heads: vec![id],
                    });
                }
            }
        }

        let store = self
            .entities
            .get_mut(instance.entity().index())
            .ok_or_else(|| CoreError::unknown_member("schema", format!("entity #{}", instance.entity().0)))?;
        if let Some(attributes) = store.remove(id) {
            undo.push(UndoAction::Reinsert {
                entity: instance.entity(),
                id,
                attributes,
            });
        }
        Ok(())
    }

    /// Applies a relation mutation. Returns how many edges changed.
    pub(crate) fn edit_relation(
        &mut self,
        tail: Instance,
        name: &str,
        edit: RelationEdit,
        undo: &mut UndoLog,
    ) -> CoreResult<usize> {
        self.require(tail)?;
        let schema = Arc::clone(&self.schema);
        let relation = schema.resolve_relation(tail.entity(), name)?;
        let def = schema.entity_def(tail.entity())?;

        match &edit {
            RelationEdit::Set(head) => {
                if relation.cardinality.is_multi() {
                    return Err(wrong_cardinality(def, relation, "set"));
                }
                if head.is_none() && relation.cardinality == Cardinality::One {
                    return Err(non_null(def, &relation.name));
                }
                self.check_heads(relation, head.as_slice())?;
            }
            RelationEdit::Add(heads) | RelationEdit::Replace(heads) => {
                if !relation.cardinality.is_multi() {
                    return Err(wrong_cardinality(def, relation, "add to"));
                }
                self.check_heads(relation, heads)?;
            }
            RelationEdit::Remove(heads) => {
                if !relation.cardinality.is_multi() {
                    return Err(wrong_cardinality(def, relation, "remove from"));
                }
                check_head_types(&schema, relation, heads)?;
            }
            RelationEdit::Clear => {
                if !relation.cardinality.is_multi() {
                    return Err(wrong_cardinality(def, relation, "clear"));
                }
            }
        }

        let id = tail.id().as_u64();
        let Some(store) = self.relation_store_mut(relation.id) else {
            return Err(CoreError::unknown_member(def.name(), name));
        };
        let (action, changed) = match (store, edit) {
            (RelationStore::Single(single), RelationEdit::Set(head)) => {
                let head = head.map(|h| h.id().as_u64());
                let previous = single.set(id, head);
                let changed = usize::from(previous != head);
                (
                    UndoAction::RestoreHeads {
                        relation: relation.id,
                        tail: id,
                        heads: previous.into_iter().collect(),
                    },
                    changed,
                )
            }
            (RelationStore::Multi(multi), RelationEdit::Add(heads)) => {
                let added = multi.add_all(id, &raw_ids(&heads));
                let changed = added.len();
                (
                    UndoAction::Unlink {
                        relation: relation.id,
                        tail: id,
                        heads: added,
                    },
                    changed,
                )
            }
            (RelationStore::Multi(multi), RelationEdit::Remove(heads)) => {
                let removed = multi.remove_all(id, &raw_ids(&heads));
                let changed = removed.len();
                (
                    UndoAction::Relink {
                        relation: relation.id,
                        tail: id,
                        heads: removed,
                    },
                    changed,
                )
            }
            (RelationStore::Multi(multi), RelationEdit::Replace(heads)) => {
                let heads = raw_ids(&heads);
                let previous = multi.replace(id, &heads);
                let changed = usize::from(previous != multi.get(id));
                (
                    UndoAction::RestoreHeads {
                        relation: relation.id,
                        tail: id,
                        heads: previous,
                    },
                    changed,
                )
            }
            (RelationStore::Multi(multi), RelationEdit::Clear) => {
                let previous = multi.clear(id);
                let changed = previous.len();
                (
                    UndoAction::RestoreHeads {
                        relation: relation.id,
                        tail: id,
                        heads: previous,
                    },
                    changed,
                )
            }
            _ => return Err(wrong_cardinality(def, relation, "edit")),
        };
        undo.push(action);
        Ok(changed)
    }

    fn check_heads(&self, relation: &RelationDef, heads: &[Instance]) -> CoreResult<()> {
        check_head_types(&self.schema, relation, heads)?;
        heads.iter().try_for_each(|head| self.require(*head))
    }

    // ---- rollback ----

    /// Applies inverse actions, newest first.
    pub(crate) fn unwind(&mut self, actions: Vec<UndoAction>) {
        for action in actions {
            self.undo(action);
        }
    }

    /// Undoes everything recorded after `mark`.
    pub(crate) fn rollback_to(&mut self, undo: &mut UndoLog, mark: usize) {
        let actions = undo.split_off(mark);
        self.unwind(actions);
    }

    fn undo(&mut self, action: UndoAction) {
        match action {
            UndoAction::Release { entity, id } => {
                if let Some(store) = self.entities.get_mut(entity.index()) {
                    store.release(id);
                }
            }
            UndoAction::Uninsert { entity, id } => {
                let owned: Vec<RelationTypeId> = self
                    .schema
                    .relations()
                    .iter()
                    .filter(|r| r.tail == entity)
                    .map(|r| r.id)
                    .collect();
                for relation in owned {
                    if let Some(store) = self.relation_store_mut(relation) {
                        store.delete_tail(id);
                    }
                }
                if let Some(store) = self.entities.get_mut(entity.index()) {
                    store.remove(id);
                }
            }
            UndoAction::Reinsert {
                entity,
                id,
                attributes,
            } => {
                if let Some(store) = self.entities.get_mut(entity.index()) {
                    store.restore(id, attributes);
                }
            }
            UndoAction::RestoreAttribute {
                entity,
                id,
                attribute,
                previous,
            } => {
                if let Some(store) = self.entities.get_mut(entity.index()) {
                    store.assign(id, &attribute, previous);
                }
            }
            UndoAction::RestoreHeads {
                relation,
                tail,
                heads,
            } => {
                if let Some(store) = self.relation_store_mut(relation) {
                    store.restore(tail, &heads);
                }
            }
            UndoAction::Unlink {
                relation,
                tail,
                heads,
            } => {
                if let Some(store) = self.relation_store_mut(relation) {
                    store.unlink(tail, &heads);
                }
            }
            UndoAction::Relink {
                relation,
                tail,
                heads,
            } => {
                if let Some(store) = self.relation_store_mut(relation) {
                    store.link(tail, &heads);
                }
            }
        }
    }

    // ---- snapshots ----

    /// Serializable fragments of every entity store, in schema order.
    pub(crate) fn fragments(&self) -> Vec<EntityFragment> {
        self.schema
            .entities()
            .iter()
            .zip(&self.entities)
            .map(|(def, store)| self.fragment(def, store))
            .collect()
    }

    fn fragment(&self, def: &EntityDef, store: &EntityStore) -> EntityFragment {
        let owned: Vec<&RelationDef> = def
            .relations()
            .iter()
            .filter_map(|id| self.schema.relation(*id))
            .collect();

        let instances = store
            .iter()
            .map(|(id, attributes)| {
                let relations = owned
                    .iter()
                    .filter_map(|relation| {
                        let heads = self.relation_store(relation.id)?.heads(id);
                        (!heads.is_empty()).then(|| (relation.name.clone(), heads))
                    })
                    .collect();
                InstanceRecord {
                    id,
                    attributes: attributes.clone(),
                    relations,
                }
            })
            .collect();

        EntityFragment {
            name: def.name().to_string(),
            attributes: def
                .attributes()
                .iter()
                .map(|a| AttributeDescriptor {
                    name: a.name.clone(),
                    data_type: a.data_type,
                    nullable: a.nullable,
                })
                .collect(),
            relations: owned
                .iter()
                .map(|r| RelationDescriptor {
                    name: r.name.clone(),
                    head: self.schema.entity_name(r.head).to_string(),
                    cardinality: r.cardinality,
                })
                .collect(),
            unique: def.unique().to_vec(),
            next_id: store.next_id(),
            instances,
        }
    }

    /// Rebuilds a graph from snapshot fragments.
    ///
    /// Fails if any fragment is incompatible with `schema`; see
    /// [`check_compatible`].
    pub(crate) fn recover(schema: Arc<Schema>, fragments: Vec<EntityFragment>) -> CoreResult<Self> {
        let mut graph = Self::new(Arc::clone(&schema));
        let mut seen = HashSet::new();
        let mut edges: Vec<(&RelationDef, u64, Vec<u64>)> = Vec::new();

        for fragment in fragments {
            let def = schema.entity_by_name(&fragment.name).ok_or_else(|| {
                CoreError::recovery(format!(
                    "snapshot holds entity {}, which the schema no longer declares",
                    fragment.name
                ))
            })?;
            if !seen.insert(def.id()) {
                return Err(CoreError::recovery(format!(
                    "snapshot holds entity {} twice",
                    fragment.name
                )));
            }
            check_compatible(&schema, def, &fragment)?;

            let store = graph
                .entities
                .get_mut(def.id().index())
                .ok_or_else(|| CoreError::recovery(format!("no store for {}", def.name())))?;
            store.set_next_id(fragment.next_id);

            let mut previous: Option<u64> = None;
            for instance in fragment.instances {
                let id = instance.id;
                if id >= fragment.next_id {
                    return Err(CoreError::recovery(format!(
                        "{} {id} is not below the id counter {}",
                        def.name(),
                        fragment.next_id
                    )));
                }
                if previous.is_some_and(|p| p >= id) {
                    return Err(CoreError::recovery(format!(
                        "{} instances are not in increasing id order at {id}",
                        def.name()
                    )));
                }
                previous = Some(id);

                for (name, heads) in instance.relations {
                    let relation = schema.resolve_relation(def.id(), &name).map_err(|_| {
                        CoreError::recovery(format!("{} {id} holds unknown relation {name}", def.name()))
                    })?;
                    edges.push((relation, id, heads));
                }
                store.load(def, id, instance.attributes)?;
            }
        }

        for (relation, tail, heads) in edges {
            if !relation.cardinality.is_multi() && heads.len() > 1 {
                return Err(CoreError::recovery(format!(
                    "{}.{} of {tail} holds {} heads",
                    schema.entity_name(relation.tail),
                    relation.name,
                    heads.len()
                )));
            }
            let head_store = graph.store(relation.head)?;
            if let Some(missing) = heads.iter().find(|h| !head_store.contains(**h)) {
                return Err(CoreError::recovery(format!(
                    "{}.{} of {tail} points at missing {} {missing}",
                    schema.entity_name(relation.tail),
                    relation.name,
                    schema.entity_name(relation.head)
                )));
            }
            if let Some(store) = graph.relation_store_mut(relation.id) {
                store.link(tail, &heads);
            }
        }
        Ok(graph)
    }
}

/// Checks that a fragment written under an older schema fits `def`.
///
/// - attributes and relations in the fragment must still exist with the
///   same data type, head and storage kind
/// - a member may become nullable, never the other way round
/// - members new to the schema must be nullable
/// - every unique constraint of the schema must already be in the fragment,
///   as there is no backfill of new unique indices
fn check_compatible(schema: &Schema, def: &EntityDef, fragment: &EntityFragment) -> CoreResult<()> {
    let entity = def.name();
    for old in &fragment.attributes {
        let current = def.attribute(&old.name).ok_or_else(|| {
            CoreError::recovery(format!("{entity}.{} was removed from the schema", old.name))
        })?;
        if current.data_type != old.data_type {
            return Err(CoreError::recovery(format!(
                "{entity}.{} changed type from {} to {}",
                old.name, old.data_type, current.data_type
            )));
        }
        if old.nullable && !current.nullable {
            return Err(CoreError::recovery(format!(
                "{entity}.{} is no longer nullable",
                old.name
            )));
        }
    }
    for current in def.attributes() {
        let known = fragment.attributes.iter().any(|a| a.name == current.name);
        if !known && !current.nullable {
            return Err(CoreError::recovery(format!(
                "{entity}.{} is new and must be nullable",
                current.name
            )));
        }
    }

    for old in &fragment.relations {
        let current = schema.resolve_relation(def.id(), &old.name).map_err(|_| {
            CoreError::recovery(format!("{entity}.{} was removed from the schema", old.name))
        })?;
        if schema.entity_name(current.head) != old.head {
            return Err(CoreError::recovery(format!(
                "{entity}.{} now points at {} instead of {}",
                old.name,
                schema.entity_name(current.head),
                old.head
            )));
        }
        if current.cardinality.is_multi() != old.cardinality.is_multi() {
            return Err(CoreError::recovery(format!(
                "{entity}.{} changed cardinality from {:?} to {:?}",
                old.name, old.cardinality, current.cardinality
            )));
        }
        if current.cardinality.is_required() && !old.cardinality.is_required() {
            return Err(CoreError::recovery(format!(
                "{entity}.{} is no longer nullable",
                old.name
            )));
        }
    }
    for id in def.relations() {
        let current = schema.relation_def(*id)?;
        let known = fragment.relations.iter().any(|r| r.name == current.name);
        if !known && current.cardinality.is_required() {
            return Err(CoreError::recovery(format!(
                "{entity}.{} is new and must be nullable",
                current.name
            )));
        }
    }

    for unique in def.unique() {
        if !fragment.unique.contains(unique) {
            return Err(CoreError::recovery(format!(
                "unique constraint on {entity}.{unique} did not exist when the snapshot was taken"
            )));
        }
    }
    Ok(())
}

fn check_head_types(schema: &Schema, relation: &RelationDef, heads: &[Instance]) -> CoreResult<()> {
    match heads.iter().find(|h| h.entity() != relation.head) {
        Some(head) => Err(CoreError::type_mismatch(format!(
            "{}.{} expects {}, got {}",
            schema.entity_name(relation.tail),
            relation.name,
            schema.entity_name(relation.head),
            schema.entity_name(head.entity())
        ))),
        None => Ok(()),
    }
}

fn raw_ids(heads: &[Instance]) -> Vec<u64> {
    heads.iter().map(|h| h.id().as_u64()).collect()
}

fn non_null(def: &EntityDef, member: &str) -> CoreError {
    CoreError::NonNullConstraintViolation {
        entity: def.name().to_string(),
        member: member.to_string(),
    }
}

fn wrong_cardinality(def: &EntityDef, relation: &RelationDef, verb: &str) -> CoreError {
    CoreError::invalid_operation(format!(
        "cannot {verb} {}.{} with cardinality {:?}",
        def.name(),
        relation.name,
        relation.cardinality
    ))
}

#[cfg(test)]
pub(crate) fn attributes<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
