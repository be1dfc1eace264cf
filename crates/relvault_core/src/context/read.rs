//! Read-only access to the object graph.

use crate::error::{CoreError, CoreResult};
use crate::instance::{FieldValue, Instance};
use crate::schema::{Accessor, EntityDef, Schema};
use crate::store::Graph;
use crate::types::InstanceId;
use relvault_codec::Value;

/// A consistent, read-only view of the store.
///
/// Obtained from [`Store::read`](crate::Store::read) (under the shared
/// lock) or from [`WriteContext::view`](crate::WriteContext::view) inside a
/// command. The view never observes a partially applied transaction.
#[derive(Clone, Copy)]
pub struct ReadContext<'g> {
    graph: &'g Graph,
}

impl<'g> ReadContext<'g> {
    pub(crate) fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &'g Schema {
        self.graph.schema()
    }

    /// Resolves an entity name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared entity.
    pub fn entity(&self, name: &str) -> CoreResult<&'g EntityDef> {
        self.graph.schema().resolve_entity(name)
    }

    /// Lists every live instance of `entity`, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared entity.
    pub fn list(&self, entity: &str) -> CoreResult<Vec<Instance>> {
        self.graph.list(self.entity(entity)?.id())
    }

    /// Counts the live instances of `entity`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared entity.
    pub fn count(&self, entity: &str) -> CoreResult<usize> {
        self.graph.count(self.entity(entity)?.id())
    }

    /// Returns the id the next inserted instance of `entity` will receive.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared entity.
    pub fn next_id(&self, entity: &str) -> CoreResult<InstanceId> {
        self.graph
            .next_id(self.entity(entity)?.id())
            .map(InstanceId::new)
    }

    /// Returns true if `instance` is live.
    #[must_use]
    pub fn exists(&self, instance: Instance) -> bool {
        self.graph.exists(instance)
    }

    /// Looks an instance up by a unique attribute.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for undeclared names and `InvalidOperation`
    /// if the attribute is not unique.
    pub fn get_by_unique(
        &self,
        entity: &str,
        attribute: &str,
        value: impl Into<Value>,
    ) -> CoreResult<Option<Instance>> {
        self.graph
            .find_unique(self.entity(entity)?.id(), attribute, &value.into())
    }

    /// Like [`get_by_unique`](Self::get_by_unique), failing when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no instance holds the value.
    pub fn equals_to(
        &self,
        entity: &str,
        attribute: &str,
        value: impl Into<Value>,
    ) -> CoreResult<Instance> {
        let value = value.into();
        self.get_by_unique(entity, attribute, value.clone())?
            .ok_or_else(|| CoreError::not_found(format!("{entity} with {attribute} = {value}")))
    }

    /// Same as [`get_by_unique`](Self::get_by_unique).
    ///
    /// # Errors
    ///
    /// See [`get_by_unique`](Self::get_by_unique).
    pub fn equals_to_or_null(
        &self,
        entity: &str,
        attribute: &str,
        value: impl Into<Value>,
    ) -> CoreResult<Option<Instance>> {
        self.get_by_unique(entity, attribute, value)
    }

    /// Reads an attribute or the identity of an instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead instance, `UnknownMember` for an
    /// undeclared name and `InvalidOperation` for a relation name.
    pub fn attribute(&self, instance: Instance, name: &str) -> CoreResult<Value> {
        match self.field(instance, name)? {
            FieldValue::Value(value) => Ok(value),
            FieldValue::Ref(_) | FieldValue::Refs(_) => Err(CoreError::invalid_operation(
                format!("{name} is a relation, not an attribute"),
            )),
        }
    }

    /// Reads any member of an instance through its accessor table.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead instance and `UnknownMember` for an
    /// undeclared name.
    pub fn field(&self, instance: Instance, name: &str) -> CoreResult<FieldValue> {
        let schema = self.graph.schema();
        let def = schema.entity_def(instance.entity())?;
        let accessor = def
            .accessor(name)
            .ok_or_else(|| CoreError::unknown_member(def.name(), name))?;
        let attributes = self.graph.attributes(instance)?;

        Ok(match accessor {
            Accessor::Identity => {
                let id = i64::try_from(instance.id().as_u64()).map_err(|_| {
                    CoreError::type_mismatch(format!("id {} exceeds integer range", instance.id()))
                })?;
                FieldValue::Value(Value::Integer(id))
            }
            Accessor::Attribute(index) => {
                let attribute = def
                    .attributes()
                    .get(index)
                    .ok_or_else(|| CoreError::unknown_member(def.name(), name))?;
                FieldValue::Value(attributes.get(&attribute.name).cloned().unwrap_or_default())
            }
            Accessor::Relation(id) => {
                let relation = schema.relation_def(id)?;
                let heads = self.graph.heads(instance, relation);
                if relation.cardinality.is_multi() {
                    FieldValue::Refs(heads)
                } else {
                    FieldValue::Ref(heads.first().copied())
                }
            }
            Accessor::Reverse(id) => {
                FieldValue::Refs(self.graph.tails(instance, schema.relation_def(id)?))
            }
        })
    }

    /// Reads a single-valued relation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a multi-valued relation.
    pub fn related(&self, instance: Instance, relation: &str) -> CoreResult<Option<Instance>> {
        self.graph.require(instance)?;
        let def = self
            .graph
            .schema()
            .resolve_relation(instance.entity(), relation)?;
        if def.cardinality.is_multi() {
            return Err(CoreError::invalid_operation(format!(
                "{relation} is multi-valued; use related_many"
            )));
        }
        Ok(self.graph.heads(instance, def).first().copied())
    }

    /// Reads the heads of any relation, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead instance and `UnknownMember` for an
    /// undeclared relation.
    pub fn related_many(&self, instance: Instance, relation: &str) -> CoreResult<Vec<Instance>> {
        self.graph.require(instance)?;
        let def = self
            .graph
            .schema()
            .resolve_relation(instance.entity(), relation)?;
        Ok(self.graph.heads(instance, def))
    }

    /// Reads the tails of a reverse relation, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` unless `name` is a reverse relation of the
    /// instance's entity.
    pub fn reverse(&self, instance: Instance, name: &str) -> CoreResult<Vec<Instance>> {
        let schema = self.graph.schema();
        let def = schema.entity_def(instance.entity())?;
        match def.accessor(name) {
            Some(Accessor::Reverse(id)) => {
                self.graph.require(instance)?;
                Ok(self.graph.tails(instance, schema.relation_def(id)?))
            }
            _ => Err(CoreError::unknown_member(def.name(), name)),
        }
    }
}

impl std::fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext").finish_non_exhaustive()
    }
}
