//! Two-pass schema builder.

use super::{Accessor, AttributeDef, Cardinality, DataType, EntityDef, RelationDef, Schema};
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, RelationTypeId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct RelationSpec {
    name: String,
    head: String,
    cardinality: Cardinality,
}

#[derive(Debug, Clone)]
struct ReverseSpec {
    name: String,
    tail: String,
    relation: String,
}

/// Declaration of one entity type.
///
/// ```
/// use relvault_core::{Cardinality, DataType, EntitySpec};
///
/// let person = EntitySpec::new("Person")
///     .identity("id")
///     .attribute("name", DataType::Text)
///     .nullable("address", DataType::Text)
///     .unique("name")
///     .relation("employer", "Company", Cardinality::ZeroOrOne);
/// ```
#[derive(Debug, Clone)]
pub struct EntitySpec {
    name: String,
    identity: Option<String>,
    attributes: Vec<AttributeDef>,
    relations: Vec<RelationSpec>,
    reverses: Vec<ReverseSpec>,
    unique: Vec<String>,
}

impl EntitySpec {
    /// Starts declaring an entity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: None,
            attributes: Vec::new(),
            relations: Vec::new(),
            reverses: Vec::new(),
            unique: Vec::new(),
        }
    }

    /// Exposes the instance id under `name`.
    #[must_use]
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity = Some(name.into());
        self
    }

    /// Declares a non-nullable attribute.
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push_attribute(name.into(), data_type, false)
    }

    /// Declares a nullable attribute.
    #[must_use]
    pub fn nullable(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push_attribute(name.into(), data_type, true)
    }

    /// Adds a unique constraint on an attribute declared on this entity.
    #[must_use]
    pub fn unique(mut self, attribute: impl Into<String>) -> Self {
        self.unique.push(attribute.into());
        self
    }

    /// Declares a relation from this entity to the entity named `head`.
    #[must_use]
    pub fn relation(
        mut self,
        name: impl Into<String>,
        head: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.relations.push(RelationSpec {
            name: name.into(),
            head: head.into(),
            cardinality,
        });
        self
    }

    /// Binds `name` on this entity to the tails of `tail.relation`.
    ///
    /// The relation must point at this entity and may be bound once.
    #[must_use]
    pub fn reverse(
        mut self,
        name: impl Into<String>,
        tail: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        self.reverses.push(ReverseSpec {
            name: name.into(),
            tail: tail.into(),
            relation: relation.into(),
        });
        self
    }

    fn push_attribute(mut self, name: String, data_type: DataType, nullable: bool) -> Self {
        self.attributes.push(AttributeDef {
            name,
            data_type,
            nullable,
        });
        self
    }
}

/// Builds an immutable [`Schema`].
///
/// Entities are built first; relation heads and reverse bindings are
/// resolved by name in a second pass, so declaration order does not matter.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntitySpec>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity declaration.
    #[must_use]
    pub fn entity(mut self, spec: EntitySpec) -> Self {
        self.entities.push(spec);
        self
    }

    /// Validates the declarations and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` for duplicate entity or member names,
    /// unknown relation heads or reverse targets, conflicting reverse
    /// bindings, and unique constraints on undeclared attributes.
    pub fn build(self) -> CoreResult<Schema> {
        let mut by_name = HashMap::new();
        let mut entities = Vec::with_capacity(self.entities.len());

        for (index, spec) in self.entities.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(CoreError::schema("entity name must not be empty"));
            }
            let id = EntityTypeId::new(u32::try_from(index).map_err(|_| {
                CoreError::schema("too many entities")
            })?);
            if by_name.insert(spec.name.clone(), id).is_some() {
                return Err(CoreError::schema(format!(
                    "duplicate entity {}",
                    spec.name
                )));
            }
            entities.push(entity_pass(id, spec)?);
        }

        let mut relations: Vec<RelationDef> = Vec::new();
        for (spec, def) in self.entities.iter().zip(entities.iter_mut()) {
            for relation in &spec.relations {
                let head = *by_name.get(&relation.head).ok_or_else(|| {
                    CoreError::schema(format!(
                        "{}.{} points at unknown entity {}",
                        spec.name, relation.name, relation.head
                    ))
                })?;
                let id = RelationTypeId::new(u32::try_from(relations.len()).map_err(|_| {
                    CoreError::schema("too many relations")
                })?);
                claim(def, &relation.name, Accessor::Relation(id))?;
                def.relations.push(id);
                relations.push(RelationDef {
                    id,
                    name: relation.name.clone(),
                    tail: def.id,
                    head,
                    cardinality: relation.cardinality,
                    reverse: None,
                });
            }
        }

        for (index, spec) in self.entities.iter().enumerate() {
            for reverse in &spec.reverses {
                let tail = by_name.get(&reverse.tail).ok_or_else(|| {
                    CoreError::schema(format!(
                        "reverse {}.{} names unknown entity {}",
                        spec.name, reverse.name, reverse.tail
                    ))
                })?;
                let relation = relations
                    .iter_mut()
                    .find(|r| r.tail == *tail && r.name == reverse.relation)
                    .ok_or_else(|| {
                        CoreError::schema(format!(
                            "reverse {}.{} names unknown relation {}.{}",
                            spec.name, reverse.name, reverse.tail, reverse.relation
                        ))
                    })?;
                let def = &mut entities[index];
                if relation.head != def.id {
                    return Err(CoreError::schema(format!(
                        "reverse {}.{} is bound to {}.{}, which does not point at {}",
                        spec.name, reverse.name, reverse.tail, reverse.relation, spec.name
                    )));
                }
                if let Some(existing) = &relation.reverse {
                    return Err(CoreError::schema(format!(
                        "{}.{} already has reverse {existing}, cannot bind {}",
                        reverse.tail, reverse.relation, reverse.name
                    )));
                }
                claim(def, &reverse.name, Accessor::Reverse(relation.id))?;
                def.reverse_relations.push(relation.id);
                relation.reverse = Some(reverse.name.clone());
            }
        }

        Ok(Schema {
            entities,
            relations,
            by_name,
        })
    }
}

fn entity_pass(id: EntityTypeId, spec: &EntitySpec) -> CoreResult<EntityDef> {
    let mut def = EntityDef {
        id,
        name: spec.name.clone(),
        identity: spec.identity.clone(),
        attributes: spec.attributes.clone(),
        relations: Vec::new(),
        reverse_relations: Vec::new(),
        unique: Vec::new(),
        accessors: HashMap::new(),
    };

    if let Some(identity) = &spec.identity {
        claim(&mut def, identity, Accessor::Identity)?;
    }
    for index in 0..spec.attributes.len() {
        claim(&mut def, &spec.attributes[index].name, Accessor::Attribute(index))?;
    }

    let mut unique = spec.unique.clone();
    unique.sort();
    unique.dedup();
    for attribute in &unique {
        if def.attribute(attribute).is_none() {
            return Err(CoreError::schema(format!(
                "unique constraint on {}.{attribute}, which is not an attribute",
                spec.name
            )));
        }
    }
    def.unique = unique;
    Ok(def)
}

fn claim(def: &mut EntityDef, name: &str, accessor: Accessor) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::schema(format!(
            "{} declares a member with an empty name",
            def.name
        )));
    }
    if def.accessors.insert(name.to_string(), accessor).is_some() {
        return Err(CoreError::schema(format!(
            "{} declares {name} more than once",
            def.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> SchemaBuilder {
        SchemaBuilder::new()
            .entity(
                EntitySpec::new("Person")
                    .identity("id")
                    .attribute("name", DataType::Text)
                    .nullable("address", DataType::Text)
                    .unique("name")
                    .relation("employer", "Company", Cardinality::ZeroOrOne)
                    .relation("friends", "Person", Cardinality::Many),
            )
            .entity(
                EntitySpec::new("Company")
                    .attribute("title", DataType::Text)
                    .reverse("employees", "Person", "employer"),
            )
    }

    #[test]
    fn builds_accessor_tables() {
        let schema = people().build().unwrap();
        let person = schema.resolve_entity("Person").unwrap();
        let company = schema.resolve_entity("Company").unwrap();

        assert_eq!(person.accessor("id"), Some(Accessor::Identity));
        assert_eq!(person.accessor("address"), Some(Accessor::Attribute(1)));
        assert!(person.is_unique("name"));
        assert!(!person.is_unique("address"));

        let employer = schema.resolve_relation(person.id(), "employer").unwrap();
        assert_eq!(employer.head, company.id());
        assert_eq!(employer.reverse.as_deref(), Some("employees"));
        assert_eq!(
            company.accessor("employees"),
            Some(Accessor::Reverse(employer.id))
        );
        assert_eq!(company.reverse_relations(), &[employer.id]);
    }

    #[test]
    fn reverse_relations_are_read_only() {
        let schema = people().build().unwrap();
        let company = schema.resolve_entity("Company").unwrap().id();
        assert!(matches!(
            schema.resolve_relation(company, "employees"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn unique_list_is_sorted_and_deduplicated() {
        let schema = SchemaBuilder::new()
            .entity(
                EntitySpec::new("Tag")
                    .attribute("slug", DataType::Text)
                    .attribute("code", DataType::Integer)
                    .unique("slug")
                    .unique("code")
                    .unique("slug"),
            )
            .build()
            .unwrap();
        assert_eq!(schema.resolve_entity("Tag").unwrap().unique(), ["code", "slug"]);
    }

    #[test]
    fn rejects_duplicate_entity() {
        let result = SchemaBuilder::new()
            .entity(EntitySpec::new("A"))
            .entity(EntitySpec::new("A"))
            .build();
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }

    #[test]
    fn rejects_member_name_clash_across_kinds() {
        let result = SchemaBuilder::new()
            .entity(
                EntitySpec::new("A")
                    .attribute("x", DataType::Bool)
                    .relation("x", "A", Cardinality::Many),
            )
            .build();
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }

    #[test]
    fn rejects_unknown_head() {
        let result = SchemaBuilder::new()
            .entity(EntitySpec::new("A").relation("b", "B", Cardinality::One))
            .build();
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }

    #[test]
    fn rejects_unique_on_missing_attribute() {
        let result = SchemaBuilder::new()
            .entity(EntitySpec::new("A").identity("id").unique("id"))
            .build();
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }

    #[test]
    fn rejects_second_reverse_binding() {
        let result = SchemaBuilder::new()
            .entity(EntitySpec::new("Person").relation("employer", "Company", Cardinality::One))
            .entity(
                EntitySpec::new("Company")
                    .reverse("employees", "Person", "employer")
                    .reverse("staff", "Person", "employer"),
            )
            .build();
        let Err(CoreError::Schema { message }) = result else {
            panic!("expected a schema error");
        };
        assert!(message.contains("already has reverse employees"));
    }

    #[test]
    fn rejects_reverse_on_wrong_head() {
        let result = SchemaBuilder::new()
            .entity(EntitySpec::new("A").relation("b", "B", Cardinality::ZeroOrOne))
            .entity(EntitySpec::new("B"))
            .entity(EntitySpec::new("C").reverse("as", "A", "b"))
            .build();
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }
}
