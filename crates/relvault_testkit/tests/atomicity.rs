//! Rollback of failed transactions.

use relvault_testkit::prelude::*;
use std::time::Duration;

fn count(store: &Store) -> usize {
    store.read(|ctx| ctx.count("Person")).unwrap()
}

#[test]
fn failing_command_undoes_earlier_commands() {
    init_tracing();
    let store = TestStore::memory();
    store.execute("create_person", person("Ann")).unwrap();
    let state = dump(&store);
    let current = store.current_transaction_id();

    let err = store
        .transaction()
        .command("create_person", person("Bob"))
        .command("update_address", id(0).with("address", "Elm St"))
        .command("befriend", id(0).with("friend", 1))
        .command("fail", Params::new().with("message", "no"))
        .submit()
        .unwrap()
        .wait()
        .unwrap_err();

    assert!(matches!(err, CoreError::Command { .. }));
    assert_eq!(dump(&store), state);
    assert_eq!(store.current_transaction_id(), current);

    let next = store.execute("create_person", person("Cy")).unwrap();
    assert_eq!(next, Value::Integer(1));
}

#[test]
fn unique_violation_leaves_both_instances_untouched() {
    let store = TestStore::memory();
    store.execute("create_person", person("Ann")).unwrap();
    store.execute("create_person", person("Bob")).unwrap();
    let state = dump(&store);

    let err = store
        .execute("create_person", person("Ann"))
        .unwrap_err();
    assert!(matches!(err, CoreError::UniqueConstraintViolation { .. }));

    let err = store
        .execute("rename_person", id(1).with("name", "Ann"))
        .unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(dump(&store), state);
}

#[test]
fn missing_parameter_rolls_back_allocation() {
    let store = TestStore::memory();
    let err = store
        .execute("create_person", Params::new().with("address", "nowhere"))
        .unwrap_err();
    assert!(matches!(err, CoreError::MissingParameter { .. }));
    assert_eq!(count(&store), 0);
    assert_eq!(
        store.execute("create_person", person("Ann")).unwrap(),
        Value::Integer(0)
    );
}

#[test]
fn dangling_head_is_rejected() {
    let store = TestStore::memory();
    let err = store
        .execute("create_person", person("Ann").with("employer", 7))
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert_eq!(count(&store), 0);
}

#[test]
fn unfinished_builder_fails_only_its_transaction() {
    let store = TestStore::memory();
    let err = store
        .transaction()
        .command("create_person", person("Ann"))
        .command("abandon_person", person("Bob"))
        .submit()
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(err, CoreError::CommandContractViolation { .. }));
    assert_eq!(count(&store), 0);

    store.execute("create_person", person("Ann")).unwrap();
    assert_eq!(count(&store), 1);
}

#[test]
fn commit_feed_reports_every_outcome_in_order() {
    let store = TestStore::memory();
    let events = store.subscribe();

    store.execute("create_person", person("Ann")).unwrap();
    store.execute("fail", Params::new()).unwrap_err();
    store.execute("create_person", person("Bob")).unwrap();

    let received: Vec<_> = (0..3)
        .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(
        received.iter().map(|e| e.committed).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    assert!(received
        .windows(2)
        .all(|w| w[0].transaction_id < w[1].transaction_id));
    assert!(received[1].error.as_deref().unwrap().contains("refused"));
}

#[test]
fn receipt_lists_every_command_result() {
    let store = TestStore::memory();
    let receipt = store
        .transaction()
        .command("create_company", company("Acme"))
        .command("create_person", person("Ann").with("employer", 0))
        .command("befriend", id(0).with("friend", 0))
        .submit()
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(
        receipt.results,
        vec![Value::Integer(0), Value::Integer(0), Value::Bool(true)]
    );
    assert_eq!(Some(receipt.transaction_id), store.current_transaction_id());
}
