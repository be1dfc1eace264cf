//! Schema model.
//!
//! A [`Schema`] is an immutable description of entity types, their
//! attributes, relations and reverse relations, and unique constraints.
//! It is built once with [`SchemaBuilder`] and shared by reference across
//! every store opened with it.
//!
//! Each entity definition carries a compiled accessor table mapping every
//! member name (identity, attribute, relation, reverse relation) to an
//! [`Accessor`]. Reads through an instance handle dispatch on that table
//! instead of on generated code.

mod builder;

pub use builder::{EntitySpec, SchemaBuilder};

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, RelationTypeId};
use relvault_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `Value::Bool`.
    Bool,
    /// `Value::Integer`.
    Integer,
    /// `Value::Text`.
    Text,
    /// `Value::Bytes`.
    Bytes,
    /// `Value::Array`.
    Array,
}

impl DataType {
    /// Returns true if `value` may be stored in an attribute of this type.
    ///
    /// `Null` is accepted by every type; nullability is checked separately.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (DataType::Bool, Value::Bool(_))
                | (DataType::Integer, Value::Integer(_))
                | (DataType::Text, Value::Text(_))
                | (DataType::Bytes, Value::Bytes(_))
                | (DataType::Array, Value::Array(_))
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Integer => "integer",
            DataType::Text => "text",
            DataType::Bytes => "bytes",
            DataType::Array => "array",
        };
        f.write_str(name)
    }
}

/// How many heads a tail may hold for one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Exactly one head; the relation must be set on insert.
    One,
    /// At most one head.
    ZeroOrOne,
    /// An ordered set of heads.
    Many,
}

impl Cardinality {
    /// Returns true if the relation is stored in a multi-valued store.
    #[must_use]
    pub const fn is_multi(self) -> bool {
        matches!(self, Cardinality::Many)
    }

    /// Returns true if a tail must always hold a head.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Cardinality::One)
    }
}

/// One attribute of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Whether the attribute may be unset.
    pub nullable: bool,
}

/// One relation from a tail entity to a head entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    /// Position in [`Schema::relations`].
    pub id: RelationTypeId,
    /// Accessor name on the tail entity.
    pub name: String,
    /// Entity owning the relation.
    pub tail: EntityTypeId,
    /// Entity the relation points to.
    pub head: EntityTypeId,
    /// Cardinality on the tail side.
    pub cardinality: Cardinality,
    /// Accessor name on the head entity resolving the tails, if bound.
    pub reverse: Option<String>,
}

/// Compiled dispatch target of an entity member name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// The instance id.
    Identity,
    /// Attribute at this index of [`EntityDef::attributes`].
    Attribute(usize),
    /// Relation owned by this entity.
    Relation(RelationTypeId),
    /// Reverse side of a relation whose head is this entity.
    Reverse(RelationTypeId),
}

/// Definition of one entity type.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub(crate) id: EntityTypeId,
    pub(crate) name: String,
    pub(crate) identity: Option<String>,
    pub(crate) attributes: Vec<AttributeDef>,
    pub(crate) relations: Vec<RelationTypeId>,
    pub(crate) reverse_relations: Vec<RelationTypeId>,
    pub(crate) unique: Vec<String>,
    pub(crate) accessors: HashMap<String, Accessor>,
}

impl EntityDef {
    /// Returns the entity type id.
    #[must_use]
    pub fn id(&self) -> EntityTypeId {
        self.id
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the identity accessor, if declared.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Returns the attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        match self.accessors.get(name) {
            Some(Accessor::Attribute(index)) => self.attributes.get(*index),
            _ => None,
        }
    }

    /// Returns the relations owned by this entity.
    #[must_use]
    pub fn relations(&self) -> &[RelationTypeId] {
        &self.relations
    }

    /// Returns the relations whose reverse side is bound on this entity.
    #[must_use]
    pub fn reverse_relations(&self) -> &[RelationTypeId] {
        &self.reverse_relations
    }

    /// Returns the unique attribute names, sorted.
    #[must_use]
    pub fn unique(&self) -> &[String] {
        &self.unique
    }

    /// Returns true if `attribute` carries a unique constraint.
    #[must_use]
    pub fn is_unique(&self, attribute: &str) -> bool {
        self.unique.binary_search_by(|u| u.as_str().cmp(attribute)).is_ok()
    }

    /// Resolves a member name through the accessor table.
    #[must_use]
    pub fn accessor(&self, name: &str) -> Option<Accessor> {
        self.accessors.get(name).copied()
    }

    pub(crate) fn require_attribute(&self, name: &str) -> CoreResult<&AttributeDef> {
        self.attribute(name)
            .ok_or_else(|| CoreError::unknown_member(&self.name, name))
    }
}

/// An immutable schema.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<EntityDef>,
    relations: Vec<RelationDef>,
    by_name: HashMap<String, EntityTypeId>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Returns every entity definition, indexed by [`EntityTypeId`].
    #[must_use]
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    /// Returns every relation definition, indexed by [`RelationTypeId`].
    #[must_use]
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Looks up an entity definition by id.
    #[must_use]
    pub fn entity(&self, id: EntityTypeId) -> Option<&EntityDef> {
        self.entities.get(id.index())
    }

    /// Looks up an entity definition by name.
    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.by_name.get(name).and_then(|id| self.entity(*id))
    }

    /// Looks up a relation definition by id.
    #[must_use]
    pub fn relation(&self, id: RelationTypeId) -> Option<&RelationDef> {
        self.relations.get(id.index())
    }

    /// Resolves an entity name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` if no entity has this name.
    pub fn resolve_entity(&self, name: &str) -> CoreResult<&EntityDef> {
        self.entity_by_name(name)
            .ok_or_else(|| CoreError::unknown_member("schema", name))
    }

    /// Resolves a relation owned by `entity`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` if `entity` owns no relation with this name.
    pub fn resolve_relation(&self, entity: EntityTypeId, name: &str) -> CoreResult<&RelationDef> {
        let def = self.entity_def(entity)?;
        match def.accessor(name) {
            Some(Accessor::Relation(id)) => self.relation_def(id),
            Some(Accessor::Reverse(_)) => Err(CoreError::invalid_operation(format!(
                "{}.{name} is a reverse relation and is read-only",
                def.name
            ))),
            _ => Err(CoreError::unknown_member(&def.name, name)),
        }
    }

    pub(crate) fn entity_def(&self, id: EntityTypeId) -> CoreResult<&EntityDef> {
        self.entity(id)
            .ok_or_else(|| CoreError::unknown_member("schema", format!("entity #{}", id.0)))
    }

    pub(crate) fn relation_def(&self, id: RelationTypeId) -> CoreResult<&RelationDef> {
        self.relation(id)
            .ok_or_else(|| CoreError::unknown_member("schema", format!("relation #{}", id.0)))
    }

    pub(crate) fn entity_name(&self, id: EntityTypeId) -> &str {
        self.entity(id).map_or("?", EntityDef::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_accepts_null_and_own_variant() {
        assert!(DataType::Text.accepts(&Value::Null));
        assert!(DataType::Text.accepts(&Value::from("a")));
        assert!(!DataType::Text.accepts(&Value::Integer(1)));
        assert!(DataType::Array.accepts(&Value::Array(vec![])));
        assert!(!DataType::Bool.accepts(&Value::Bytes(vec![])));
    }

    #[test]
    fn cardinality_flags() {
        assert!(Cardinality::Many.is_multi());
        assert!(!Cardinality::ZeroOrOne.is_multi());
        assert!(Cardinality::One.is_required());
        assert!(!Cardinality::Many.is_required());
    }
}
