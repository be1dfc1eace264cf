//! Reopening a snapshot under a changed schema.

use relvault_core::{Cardinality, CommandRegistry, DataType, EntitySpec, Schema};
use relvault_storage::{MemorySnapshotLog, MemoryTransactionLog};
use relvault_testkit::prelude::*;
use std::sync::Arc;

fn company() -> EntitySpec {
    EntitySpec::new("Company")
        .identity("id")
        .attribute("name", DataType::Text)
        .unique("name")
        .reverse("employees", "Person", "employer")
}

fn person_base() -> EntitySpec {
    EntitySpec::new("Person")
        .identity("id")
        .attribute("name", DataType::Text)
        .nullable("address", DataType::Text)
        .nullable("age", DataType::Integer)
        .unique("name")
        .relation("employer", "Company", Cardinality::ZeroOrOne)
        .relation("friends", "Person", Cardinality::Many)
        .reverse("friend_of", "Person", "friends")
}

fn schema_with(person: EntitySpec) -> Schema {
    Schema::builder()
        .entity(company())
        .entity(person)
        .build()
        .expect("Failed to build schema")
}

fn populated() -> TestStore {
    let store = TestStore::memory();
    store.execute("create_person", person("Ann").with("age", 30)).unwrap();
    store.execute("create_person", person("Bob")).unwrap();
    store.snapshot().unwrap();
    store.close().unwrap();
    store
}

#[test]
fn unchanged_schema_reopens() {
    let store = populated();
    let reopened = store
        .open_handle(schema_with(person_base()), CommandRegistry::new())
        .unwrap();
    assert_eq!(reopened.read(|ctx| ctx.count("Person")).unwrap(), 2);
}

#[test]
fn new_nullable_attribute_reads_as_null() {
    let store = populated();
    let reopened = store
        .open_handle(
            schema_with(person_base().nullable("nickname", DataType::Text)),
            CommandRegistry::new(),
        )
        .unwrap();

    reopened
        .read(|ctx| {
            let ann = ctx.equals_to("Person", "name", "Ann")?;
            assert_eq!(ctx.attribute(ann, "nickname")?, Value::Null);
            assert_eq!(ctx.attribute(ann, "age")?, Value::Integer(30));
            Ok(())
        })
        .unwrap();
}

#[test]
fn new_unique_constraint_is_rejected() {
    let store = populated();
    let err = store
        .open_handle(
            schema_with(person_base().unique("address")),
            CommandRegistry::new(),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Recovery { .. }), "{err}");
}

#[test]
fn new_non_null_attribute_is_rejected() {
    let store = populated();
    let err = store
        .open_handle(
            schema_with(person_base().attribute("email", DataType::Text)),
            CommandRegistry::new(),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Recovery { .. }), "{err}");
}

#[test]
fn removed_attribute_is_rejected() {
    let store = populated();
    let person = EntitySpec::new("Person")
        .identity("id")
        .attribute("name", DataType::Text)
        .nullable("address", DataType::Text)
        .unique("name")
        .relation("employer", "Company", Cardinality::ZeroOrOne)
        .relation("friends", "Person", Cardinality::Many)
        .reverse("friend_of", "Person", "friends");
    let err = store
        .open_handle(schema_with(person), CommandRegistry::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Recovery { .. }), "{err}");
}

#[test]
fn model_version_must_match() {
    let log = MemoryTransactionLog::new();
    let snapshots = MemorySnapshotLog::new();
    let open = |version: u32| {
        Store::builder(STORE_NAME, sample_schema())
            .commands(sample_commands())
            .transaction_log(Arc::new(log.connect()))
            .snapshot_log(Arc::new(snapshots.clone()))
            .config(StoreConfig::new().model_version(version))
            .open()
    };

    let store = open(1).unwrap();
    store.execute("create_person", person("Ann")).unwrap();
    store.snapshot().unwrap();
    store.close().unwrap();
    drop(store);

    let err = open(2).unwrap_err();
    assert!(matches!(
        err,
        CoreError::ModelVersionMismatch {
            expected: 2,
            found: 1,
            ..
        }
    ));
    assert!(open(1).is_ok());
}
