//! Entity store: instances, id counter and unique indices of one entity type.

use super::undo::UndoAction;
use crate::error::{CoreError, CoreResult};
use crate::instance::Attributes;
use crate::schema::EntityDef;
use crate::types::EntityTypeId;
use relvault_codec::Value;
use std::collections::{BTreeMap, HashMap};

/// All instances of one entity type.
///
/// Instances are kept in id order, which is also the iteration order of
/// `list()`. Null values are never indexed, so any number of instances may
/// leave a unique attribute unset.
#[derive(Debug, Clone)]
pub(crate) struct EntityStore {
    entity: EntityTypeId,
    instances: BTreeMap<u64, Attributes>,
    next_id: u64,
    unique: HashMap<String, HashMap<Value, u64>>,
}

impl EntityStore {
    pub(crate) fn new(def: &EntityDef) -> Self {
        Self {
            entity: def.id(),
            instances: BTreeMap::new(),
            next_id: 0,
            unique: def
                .unique()
                .iter()
                .map(|attribute| (attribute.clone(), HashMap::new()))
                .collect(),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.instances.contains_key(&id)
    }

    pub(crate) fn get(&self, id: u64) -> Option<&Attributes> {
        self.instances.get(&id)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.instances.keys().copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &Attributes)> + '_ {
        self.instances.iter().map(|(id, attrs)| (*id, attrs))
    }

    pub(crate) fn find_unique(&self, attribute: &str, value: &Value) -> Option<u64> {
        self.unique.get(attribute)?.get(value).copied()
    }

    /// Reserves the next id. The instance stays invisible until inserted.
    pub(crate) fn allocate(&mut self) -> (u64, UndoAction) {
        let id = self.next_id;
        self.next_id += 1;
        (
            id,
            UndoAction::Release {
                entity: self.entity,
                id,
            },
        )
    }

    pub(crate) fn release(&mut self, id: u64) {
        if id < self.next_id {
            self.next_id = id;
        }
    }

    /// Checks types and non-null attributes of a complete attribute dictionary.
    pub(crate) fn validate(def: &EntityDef, attributes: &Attributes) -> CoreResult<()> {
        for (name, value) in attributes {
            let attribute = def.require_attribute(name)?;
            check_type(def, &attribute.name, attribute.data_type.accepts(value), value)?;
        }
        for attribute in def.attributes() {
            let present = attributes.get(&attribute.name).is_some_and(|v| !v.is_null());
            if !attribute.nullable && !present {
                return Err(CoreError::NonNullConstraintViolation {
                    entity: def.name().to_string(),
                    member: attribute.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Makes a validated instance visible under an allocated id.
    pub(crate) fn insert(
        &mut self,
        def: &EntityDef,
        id: u64,
        mut attributes: Attributes,
    ) -> CoreResult<UndoAction> {
        if self.instances.contains_key(&id) || id >= self.next_id {
            return Err(CoreError::invalid_operation(format!(
                "id {id} of {} was not allocated for insert",
                def.name()
            )));
        }
        Self::validate(def, &attributes)?;
        attributes.retain(|_, value| !value.is_null());
        self.index_all(def, id, &attributes)?;
        self.instances.insert(id, attributes);
        Ok(UndoAction::Uninsert {
            entity: self.entity,
            id,
        })
    }

    /// Changes one attribute. The instance is left untouched on error.
    pub(crate) fn update(
        &mut self,
        def: &EntityDef,
        id: u64,
        name: &str,
        value: Value,
    ) -> CoreResult<UndoAction> {
        let attribute = def.require_attribute(name)?;
        check_type(def, name, attribute.data_type.accepts(&value), &value)?;
        if value.is_null() && !attribute.nullable {
            return Err(CoreError::NonNullConstraintViolation {
                entity: def.name().to_string(),
                member: name.to_string(),
            });
        }
        let previous = self
            .instances
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("{} {id}", def.name())))?
            .get(name)
            .cloned()
            .unwrap_or_default();

        if !value.is_null() {
            if let Some(holder) = self.find_unique(name, &value) {
                if holder != id {
                    return Err(unique_violation(def, name, &value));
                }
            }
        }

        self.assign(id, name, value);
        Ok(UndoAction::RestoreAttribute {
            entity: self.entity,
            id,
            attribute: name.to_string(),
            previous,
        })
    }

    /// Writes an attribute and moves its index entry without checks.
    pub(crate) fn assign(&mut self, id: u64, name: &str, value: Value) {
        let Some(attributes) = self.instances.get_mut(&id) else {
            return;
        };
        let previous = if value.is_null() {
            attributes.remove(name)
        } else {
            attributes.insert(name.to_string(), value.clone())
        };
        if let Some(index) = self.unique.get_mut(name) {
            if let Some(previous) = previous {
                if index.get(&previous) == Some(&id) {
                    index.remove(&previous);
                }
            }
            if !value.is_null() {
                index.insert(value, id);
            }
        }
    }

    /// Removes an instance and its index entries.
    pub(crate) fn remove(&mut self, id: u64) -> Option<Attributes> {
        let attributes = self.instances.remove(&id)?;
        self.unindex(id, &attributes);
        Some(attributes)
    }

    /// Puts a removed instance back without checks.
    pub(crate) fn restore(&mut self, id: u64, attributes: Attributes) {
        for (name, index) in &mut self.unique {
            if let Some(value) = attributes.get(name) {
                index.insert(value.clone(), id);
            }
        }
        self.instances.insert(id, attributes);
    }

    /// Loads one recovered instance, enforcing unique indices.
    pub(crate) fn load(&mut self, def: &EntityDef, id: u64, attributes: Attributes) -> CoreResult<()> {
        if self.instances.contains_key(&id) {
            return Err(CoreError::recovery(format!(
                "{} {id} appears twice in the snapshot",
                def.name()
            )));
        }
        Self::validate(def, &attributes).map_err(|e| {
            CoreError::recovery(format!("{} {id} does not fit the schema: {e}", def.name()))
        })?;
        self.index_all(def, id, &attributes).map_err(|e| {
            CoreError::recovery(format!("{} {id} breaks a unique index: {e}", def.name()))
        })?;
        self.instances.insert(id, attributes);
        Ok(())
    }

    pub(crate) fn set_next_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    /// Indexes every unique attribute present, or none of them.
    fn index_all(&mut self, def: &EntityDef, id: u64, attributes: &Attributes) -> CoreResult<()> {
        let mut applied: Vec<(&str, &Value)> = Vec::new();
        for name in def.unique() {
            let Some(value) = attributes.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            let index = self.unique.entry(name.clone()).or_default();
            let holder = index.get(value).copied();
            if holder.is_some_and(|holder| holder != id) {
                for (applied_name, applied_value) in applied {
                    if let Some(applied_index) = self.unique.get_mut(applied_name) {
                        applied_index.remove(applied_value);
                    }
                }
                return Err(unique_violation(def, name, value));
            }
            index.insert(value.clone(), id);
            applied.push((name, value));
        }
        Ok(())
    }

    fn unindex(&mut self, id: u64, attributes: &Attributes) {
        for (name, index) in &mut self.unique {
            if let Some(value) = attributes.get(name) {
                if index.get(value) == Some(&id) {
                    index.remove(value);
                }
            }
        }
    }
}

fn check_type(def: &EntityDef, name: &str, accepted: bool, value: &Value) -> CoreResult<()> {
    if accepted {
        return Ok(());
    }
    let expected = def
        .attribute(name)
        .map_or_else(|| "?".to_string(), |a| a.data_type.to_string());
    Err(CoreError::type_mismatch(format!(
        "{}.{name} expects {expected}, got {}",
        def.name(),
        value.kind()
    )))
}

fn unique_violation(def: &EntityDef, attribute: &str, value: &Value) -> CoreError {
    CoreError::UniqueConstraintViolation {
        entity: def.name().to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, EntitySpec, Schema};

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntitySpec::new("Person")
                    .attribute("name", DataType::Text)
                    .nullable("email", DataType::Text)
                    .nullable("age", DataType::Integer)
                    .unique("name")
                    .unique("email"),
            )
            .build()
            .unwrap()
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn insert(store: &mut EntityStore, def: &EntityDef, pairs: &[(&str, Value)]) -> CoreResult<u64> {
        let (id, _) = store.allocate();
        store.insert(def, id, attrs(pairs))?;
        Ok(id)
    }

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);

        let a = insert(&mut store, def, &[("name", "a".into())]).unwrap();
        let b = insert(&mut store, def, &[("name", "b".into())]).unwrap();
        assert_eq!((a, b), (0, 1));

        store.remove(b);
        let c = insert(&mut store, def, &[("name", "c".into())]).unwrap();
        assert_eq!(c, 2);
        assert_eq!(store.ids().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn insert_requires_non_null() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);

        let err = insert(&mut store, def, &[("email", "x@y".into())]).unwrap_err();
        assert!(matches!(err, CoreError::NonNullConstraintViolation { .. }));
        let err = insert(&mut store, def, &[("name", Value::Null)]).unwrap_err();
        assert!(matches!(err, CoreError::NonNullConstraintViolation { .. }));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn insert_checks_types_and_members() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);

        let err = insert(&mut store, def, &[("name", Value::Integer(1))]).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        let err = insert(&mut store, def, &[("name", "a".into()), ("nick", "b".into())]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMember { .. }));
    }

    #[test]
    fn failed_insert_unindexes_applied_values() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);

        insert(&mut store, def, &[("name", "taken".into())]).unwrap();
        // "email" sorts before "name", so it is indexed first and must be undone.
        let err = insert(
            &mut store,
            def,
            &[("name", "taken".into()), ("email", "fresh@x".into())],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraintViolation { .. }));
        assert_eq!(store.find_unique("email", &"fresh@x".into()), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_moves_index_entry() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        let id = insert(&mut store, def, &[("name", "old".into())]).unwrap();

        let undo = store.update(def, id, "name", "new".into()).unwrap();
        assert_eq!(store.find_unique("name", &"old".into()), None);
        assert_eq!(store.find_unique("name", &"new".into()), Some(id));

        let UndoAction::RestoreAttribute { previous, .. } = undo else {
            panic!("unexpected undo action");
        };
        store.assign(id, "name", previous);
        assert_eq!(store.find_unique("name", &"old".into()), Some(id));
        assert_eq!(store.find_unique("name", &"new".into()), None);
    }

    #[test]
    fn update_collision_leaves_both_untouched() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        let a = insert(&mut store, def, &[("name", "a".into())]).unwrap();
        let b = insert(&mut store, def, &[("name", "b".into())]).unwrap();

        let err = store.update(def, b, "name", "a".into()).unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraintViolation { .. }));
        assert_eq!(store.get(b).unwrap().get("name"), Some(&"b".into()));
        assert_eq!(store.find_unique("name", &"a".into()), Some(a));
        assert_eq!(store.find_unique("name", &"b".into()), Some(b));
    }

    #[test]
    fn update_to_same_value_is_allowed() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        let a = insert(&mut store, def, &[("name", "a".into())]).unwrap();
        store.update(def, a, "name", "a".into()).unwrap();
        assert_eq!(store.find_unique("name", &"a".into()), Some(a));
    }

    #[test]
    fn nulls_are_not_indexed() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        insert(&mut store, def, &[("name", "a".into())]).unwrap();
        insert(&mut store, def, &[("name", "b".into()), ("email", Value::Null)]).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(1).unwrap().get("email").is_none());
    }

    #[test]
    fn remove_and_restore_keep_id_and_index() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        let id = insert(&mut store, def, &[("name", "a".into())]).unwrap();

        let attributes = store.remove(id).unwrap();
        assert_eq!(store.find_unique("name", &"a".into()), None);
        store.restore(id, attributes);
        assert_eq!(store.find_unique("name", &"a".into()), Some(id));
        assert_eq!(store.next_id(), 1);
    }

    #[test]
    fn release_rewinds_counter() {
        let schema = schema();
        let def = &schema.entities()[0];
        let mut store = EntityStore::new(def);
        let (first, _) = store.allocate();
        let (second, _) = store.allocate();
        store.release(second);
        store.release(first);
        assert_eq!(store.next_id(), 0);
    }
}
