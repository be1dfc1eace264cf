//! Random workloads against the sample model.

use proptest::prelude::*;
use relvault_testkit::prelude::*;
use std::collections::HashSet;

fn run(store: &Store, workload: &[Vec<Op>]) -> Vec<i64> {
    let mut created = Vec::new();
    for transaction in workload {
        let commands = transaction.iter().map(Op::command).collect();
        let Ok(receipt) = store.submit(commands).unwrap().wait() else {
            continue;
        };
        for (op, result) in transaction.iter().zip(receipt.results) {
            if let (Op::Create(_), Value::Integer(id)) = (op, result) {
                created.push(id);
            }
        }
    }
    created
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn names_stay_unique(workload in workload_strategy(12)) {
        let store = TestStore::memory();
        run(&store, &workload);

        let names = store
            .read(|ctx| {
                ctx.list("Person")?
                    .into_iter()
                    .map(|p| ctx.attribute(p, "name"))
                    .collect::<CoreResult<Vec<_>>>()
            })
            .unwrap();
        let distinct: HashSet<String> = names.iter().map(ToString::to_string).collect();
        prop_assert_eq!(distinct.len(), names.len());
    }

    #[test]
    fn committed_ids_strictly_increase(workload in workload_strategy(12)) {
        let store = TestStore::memory();
        let created = run(&store, &workload);
        prop_assert!(created.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reopen_reproduces_state(workload in workload_strategy(12), snapshot_at in 0usize..12) {
        let store = TestStore::memory();
        let (head, tail) = workload.split_at(snapshot_at.min(workload.len()));
        run(&store, head);
        store.snapshot().unwrap();
        run(&store, tail);

        let state = dump(&store);
        let current = store.current_transaction_id();
        let store = store.reopen();
        prop_assert_eq!(dump(&store), state);
        prop_assert_eq!(store.current_transaction_id(), current);
    }
}
