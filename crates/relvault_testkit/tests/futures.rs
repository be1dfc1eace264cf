//! Futures returned by submission.

use relvault_core::CommandRegistry;
use relvault_testkit::prelude::*;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn slow_commands(delay: Duration) -> CommandRegistry {
    let mut commands = sample_commands();
    commands
        .register_fn("slow", move |_, _| {
            thread::sleep(delay);
            Ok(Value::from("done"))
        })
        .expect("Failed to register slow command");
    commands
}

#[test]
fn command_future_returns_its_own_result() {
    let store = TestStore::memory();
    let future = store.submit_command("create_company", company("Acme")).unwrap();
    assert_eq!(future.wait().unwrap(), Value::Integer(0));

    let failed = store.submit_command("fail", Params::new()).unwrap();
    assert!(matches!(failed.wait(), Err(CoreError::Command { .. })));
}

#[test]
fn correlation_ids_are_distinct() {
    let store = TestStore::memory();
    let a = store.submit_command("create_person", person("Ann")).unwrap();
    let b = store.submit_command("create_person", person("Bob")).unwrap();
    assert_ne!(a.correlation_id(), b.correlation_id());
    a.wait().unwrap();
    b.wait().unwrap();
}

#[test]
fn unknown_command_is_refused_at_submit() {
    let store = TestStore::memory();
    let err = store.submit_command("nope", Params::new()).unwrap_err();
    assert!(matches!(err, CoreError::UnknownCommand { .. }));
    assert_eq!(store.execute("create_person", person("Ann")).unwrap(), Value::Integer(0));
}

#[test]
fn wait_timeout_hands_the_future_back() {
    let base = TestStore::memory();
    let store = base
        .open_handle(sample_schema(), slow_commands(Duration::from_millis(300)))
        .unwrap();

    let future = store.submit_command("slow", Params::new()).unwrap();
    let future = match future.wait_timeout(Duration::from_millis(1)) {
        Ok(result) => panic!("finished too early: {result:?}"),
        Err(future) => future,
    };
    assert_eq!(future.wait().unwrap(), Value::from("done"));
}

#[test]
fn cancelled_transaction_still_commits() {
    let store = TestStore::memory();
    let events = store.subscribe();
    let future = store
        .transaction()
        .command("create_person", person("Ann"))
        .submit()
        .unwrap();
    let correlation_id = future.correlation_id();
    assert!(matches!(future.cancel(), Err(CoreError::Cancelled)));

    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.correlation_id, correlation_id);
    assert!(event.committed);
    assert_eq!(store.read(|ctx| ctx.count("Person")).unwrap(), 1);
}

#[test]
fn dropped_future_does_not_block_later_ones() {
    let store = TestStore::memory();
    drop(store.submit_command("create_person", person("Ann")).unwrap());
    let bob = store.execute("create_person", person("Bob")).unwrap();
    assert_eq!(bob, Value::Integer(1));
}

#[test]
fn try_result_is_empty_until_executed() {
    let base = TestStore::memory();
    let store = base
        .open_handle(sample_schema(), slow_commands(Duration::from_millis(200)))
        .unwrap();

    let future = store.transaction().command("slow", Params::new()).submit().unwrap();
    assert!(future.try_result().is_none());
    store.sync(WAIT).unwrap();
    let receipt = future.try_result().unwrap().unwrap();
    assert_eq!(receipt.results, vec![Value::from("done")]);
}

#[test]
fn pending_futures_fail_when_the_store_closes() {
    init_tracing();
    let base = TestStore::memory();
    let store = base
        .open_handle(sample_schema(), slow_commands(Duration::from_millis(200)))
        .unwrap();

    let first = store.submit_command("slow", Params::new()).unwrap();
    let second = store.submit_command("create_person", person("Ann")).unwrap();
    store.close().unwrap();

    assert!(matches!(second.wait(), Err(CoreError::StoreClosed)));
    assert!(matches!(
        first.wait(),
        Ok(_) | Err(CoreError::StoreClosed)
    ));
    assert!(matches!(
        store.submit_command("slow", Params::new()),
        Err(CoreError::StoreClosed)
    ));
}
