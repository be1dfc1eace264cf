//! Relation stores.
//!
//! Each relation owns a forward map (tail → head or heads) and a mirrored
//! reverse map (head → tails). Every mutation updates both sides together
//! and reports what it actually changed, so the caller can record the exact
//! inverse mutation.

use std::collections::{BTreeSet, HashMap};

/// Mirror of the forward map: head id → tail ids.
#[derive(Debug, Default, Clone)]
struct ReverseIndex {
    tails: HashMap<u64, BTreeSet<u64>>,
}

impl ReverseIndex {
    fn link(&mut self, head: u64, tail: u64) {
        self.tails.entry(head).or_default().insert(tail);
    }

    fn unlink(&mut self, head: u64, tail: u64) {
        if let Some(tails) = self.tails.get_mut(&head) {
            tails.remove(&tail);
            if tails.is_empty() {
                self.tails.remove(&head);
            }
        }
    }

    fn tails(&self, head: u64) -> Vec<u64> {
        self.tails
            .get(&head)
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// A relation with at most one head per tail.
#[derive(Debug, Default, Clone)]
pub(crate) struct SingleRelation {
    forward: HashMap<u64, u64>,
    reverse: ReverseIndex,
}

impl SingleRelation {
    pub(crate) fn get(&self, tail: u64) -> Option<u64> {
        self.forward.get(&tail).copied()
    }

    /// Sets or clears the head of `tail`. Returns the previous head.
    pub(crate) fn set(&mut self, tail: u64, head: Option<u64>) -> Option<u64> {
        let previous = match head {
            Some(head) => self.forward.insert(tail, head),
            None => self.forward.remove(&tail),
        };
        if let Some(old) = previous {
            self.reverse.unlink(old, tail);
        }
        if let Some(head) = head {
            self.reverse.link(head, tail);
        }
        previous
    }
}

/// A relation with an ordered set of heads per tail.
#[derive(Debug, Default, Clone)]
pub(crate) struct MultiRelation {
    forward: HashMap<u64, BTreeSet<u64>>,
    reverse: ReverseIndex,
}

impl MultiRelation {
    pub(crate) fn get(&self, tail: u64) -> Vec<u64> {
        self.forward
            .get(&tail)
            .map(|heads| heads.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns true if the edge was added.
    pub(crate) fn add(&mut self, tail: u64, head: u64) -> bool {
        let added = self.forward.entry(tail).or_default().insert(head);
        if added {
            self.reverse.link(head, tail);
        }
        added
    }

    /// Returns true if the edge was removed.
    pub(crate) fn remove(&mut self, tail: u64, head: u64) -> bool {
        let Some(heads) = self.forward.get_mut(&tail) else {
            return false;
        };
        let removed = heads.remove(&head);
        if heads.is_empty() {
            self.forward.remove(&tail);
        }
        if removed {
            self.reverse.unlink(head, tail);
        }
        removed
    }

    /// Returns the heads that were not already present, ascending.
    pub(crate) fn add_all(&mut self, tail: u64, heads: &[u64]) -> Vec<u64> {
        let mut added: Vec<u64> = heads.iter().copied().filter(|h| self.add(tail, *h)).collect();
        added.sort_unstable();
        added
    }

    /// Returns the heads that were actually present, ascending.
    pub(crate) fn remove_all(&mut self, tail: u64, heads: &[u64]) -> Vec<u64> {
        let mut removed: Vec<u64> = heads
            .iter()
            .copied()
            .filter(|h| self.remove(tail, *h))
            .collect();
        removed.sort_unstable();
        removed
    }

    /// Replaces the heads of `tail`. Returns the previous heads.
    pub(crate) fn replace(&mut self, tail: u64, heads: &[u64]) -> Vec<u64> {
        let previous = self.clear(tail);
        for head in heads {
            self.add(tail, *head);
        }
        previous
    }

    /// Removes every head of `tail`. Returns the previous heads.
    pub(crate) fn clear(&mut self, tail: u64) -> Vec<u64> {
        let previous = self.forward.remove(&tail).unwrap_or_default();
        for head in &previous {
            self.reverse.unlink(*head, tail);
        }
        previous.into_iter().collect()
    }
}

/// Storage for one relation, chosen by cardinality.
#[derive(Debug, Clone)]
pub(crate) enum RelationStore {
    Single(SingleRelation),
    Multi(MultiRelation),
}

impl RelationStore {
    pub(crate) fn new(multi: bool) -> Self {
        if multi {
            Self::Multi(MultiRelation::default())
        } else {
            Self::Single(SingleRelation::default())
        }
    }

    /// Heads of `tail`, ascending.
    pub(crate) fn heads(&self, tail: u64) -> Vec<u64> {
        match self {
            Self::Single(store) => store.get(tail).into_iter().collect(),
            Self::Multi(store) => store.get(tail),
        }
    }

    /// Tails pointing at `head`, ascending.
    pub(crate) fn tails(&self, head: u64) -> Vec<u64> {
        match self {
            Self::Single(store) => store.reverse.tails(head),
            Self::Multi(store) => store.reverse.tails(head),
        }
    }

    /// Removes every edge leaving `tail`. Returns the removed heads.
    pub(crate) fn delete_tail(&mut self, tail: u64) -> Vec<u64> {
        match self {
            Self::Single(store) => store.set(tail, None).into_iter().collect(),
            Self::Multi(store) => store.clear(tail),
        }
    }

    /// Removes every edge arriving at `head`. Returns the affected tails.
    pub(crate) fn delete_head(&mut self, head: u64) -> Vec<u64> {
        let tails = self.tails(head);
        for tail in &tails {
            match self {
                Self::Single(store) => {
                    store.set(*tail, None);
                }
                Self::Multi(store) => {
                    store.remove(*tail, head);
                }
            }
        }
        tails
    }

    /// Adds back the edges `tail → heads`.
    ///
    /// For a single-valued relation only the last head is kept.
    pub(crate) fn link(&mut self, tail: u64, heads: &[u64]) {
        match self {
            Self::Single(store) => {
                if let Some(head) = heads.last() {
                    store.set(tail, Some(*head));
                }
            }
            Self::Multi(store) => {
                store.add_all(tail, heads);
            }
        }
    }

    /// Removes the edges `tail → heads`.
    pub(crate) fn unlink(&mut self, tail: u64, heads: &[u64]) {
        match self {
            Self::Single(store) => {
                if store.get(tail).is_some_and(|h| heads.contains(&h)) {
                    store.set(tail, None);
                }
            }
            Self::Multi(store) => {
                store.remove_all(tail, heads);
            }
        }
    }

    /// Sets the heads of `tail` to exactly `heads`.
    pub(crate) fn restore(&mut self, tail: u64, heads: &[u64]) {
        self.delete_tail(tail);
        self.link(tail, heads);
    }

    /// Every tail with at least one head, ascending.
    pub(crate) fn tail_ids(&self) -> Vec<u64> {
        let mut tails: Vec<u64> = match self {
            Self::Single(store) => store.forward.keys().copied().collect(),
            Self::Multi(store) => store.forward.keys().copied().collect(),
        };
        tails.sort_unstable();
        tails
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let forward: BTreeSet<(u64, u64)> = self
            .tail_ids()
            .into_iter()
            .flat_map(|tail| self.heads(tail).into_iter().map(move |head| (tail, head)))
            .collect();
        let reverse = match self {
            Self::Single(store) => &store.reverse,
            Self::Multi(store) => &store.reverse,
        };
        let mirrored: BTreeSet<(u64, u64)> = reverse
            .tails
            .iter()
            .flat_map(|(head, tails)| tails.iter().map(move |tail| (*tail, *head)))
            .collect();
        let no_empty_sets = reverse.tails.values().all(|t| !t.is_empty());
        forward == mirrored && no_empty_sets
    }
}
