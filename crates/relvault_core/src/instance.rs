//! Instance handles.

use crate::types::{EntityTypeId, InstanceId};
use relvault_codec::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute dictionary of one instance. An absent key is null.
pub(crate) type Attributes = BTreeMap<String, Value>;

/// A value handle to one instance: `(entity type, id)`.
///
/// Handles carry no data. Attribute and relation reads go through a
/// [`ReadContext`](crate::ReadContext), which owns the attribute
/// dictionaries and relation stores. Two handles are equal when they name
/// the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instance {
    entity: EntityTypeId,
    id: InstanceId,
}

impl Instance {
    /// Creates a handle.
    #[must_use]
    pub const fn new(entity: EntityTypeId, id: InstanceId) -> Self {
        Self { entity, id }
    }

    /// Returns the entity type.
    #[must_use]
    pub const fn entity(&self) -> EntityTypeId {
        self.entity
    }

    /// Returns the id within the entity type.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.entity.0, self.id.0)
    }
}

/// Result of reading a member through the accessor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// An attribute or the identity.
    Value(Value),
    /// A single-valued relation.
    Ref(Option<Instance>),
    /// A multi-valued relation or a reverse relation, ascending by id.
    Refs(Vec<Instance>),
}

impl FieldValue {
    /// Returns the scalar value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the referenced instances, whatever the cardinality.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            FieldValue::Value(_) => Vec::new(),
            FieldValue::Ref(head) => head.iter().copied().collect(),
            FieldValue::Refs(heads) => heads.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality() {
        let a = Instance::new(EntityTypeId::new(0), InstanceId::new(3));
        let b = Instance::new(EntityTypeId::new(0), InstanceId::new(3));
        let c = Instance::new(EntityTypeId::new(1), InstanceId::new(3));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "#0:3");
    }

    #[test]
    fn field_instances() {
        let a = Instance::new(EntityTypeId::new(0), InstanceId::new(1));
        assert_eq!(FieldValue::Ref(Some(a)).instances(), vec![a]);
        assert!(FieldValue::Ref(None).instances().is_empty());
        assert!(FieldValue::Value(Value::Null).instances().is_empty());
    }
}
