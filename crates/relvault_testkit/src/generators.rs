//! Property-based test generators using proptest.
//!
//! Provides strategies for random workloads against the sample model.
//! Names are drawn from a small alphabet so collisions on the unique
//! `name` attribute are frequent.

use crate::fixtures::{id, person};
use proptest::prelude::*;
use relvault_core::{CommandRecord, Params, Value};

/// Strategy for person names, short enough to collide often.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-c]{1,2}").expect("Invalid regex")
}

/// One step of a random workload. Indices refer to ids that may or may
/// not exist, so some steps fail on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Create a person.
    Create(String),
    /// Rename a person.
    Rename(u64, String),
    /// Delete a person.
    Delete(u64),
    /// Add a friendship edge.
    Befriend(u64, u64),
    /// A command that always fails.
    Fail,
}

impl Op {
    /// The command that performs this step.
    pub fn command(&self) -> CommandRecord {
        let (name, params) = match self {
            Self::Create(name) => ("create_person", person(name)),
            Self::Rename(target, name) => ("rename_person", id(*target).with("name", name.as_str())),
            Self::Delete(target) => ("delete_person", id(*target)),
            Self::Befriend(a, b) => ("befriend", id(*a).with("friend", Value::Integer(*b as i64))),
            Self::Fail => ("fail", Params::new()),
        };
        CommandRecord {
            name: name.to_string(),
            params,
        }
    }
}

/// Strategy for a single workload step over ids below `max_id`.
pub fn op_strategy(max_id: u64) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => name_strategy().prop_map(Op::Create),
        2 => (0..max_id, name_strategy()).prop_map(|(target, name)| Op::Rename(target, name)),
        1 => (0..max_id).prop_map(Op::Delete),
        2 => (0..max_id, 0..max_id).prop_map(|(a, b)| Op::Befriend(a, b)),
        1 => Just(Op::Fail),
    ]
}

/// Strategy for a workload of transactions, each a short list of steps.
pub fn workload_strategy(transactions: usize) -> impl Strategy<Value = Vec<Vec<Op>>> {
    prop::collection::vec(prop::collection::vec(op_strategy(8), 1..4), 1..transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn ops_map_to_registered_commands() {
        let commands = crate::fixtures::sample_commands();
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let op = op_strategy(4).new_tree(&mut runner).unwrap().current();
            assert!(commands.contains(&op.command().name));
        }
    }
}
