//! Transaction states and the change log.

use crate::types::{CollectionId, ObjectId};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a write transaction.
///
/// ```text
/// Idle -> Active -> Committing -> Committed
///                -> Cancelling -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// No write transaction is running.
    Idle,
    /// Reads and writes are allowed.
    Active,
    /// Changes are being validated and written.
    Committing,
    /// Changes are durable and visible.
    Committed,
    /// Changes are being discarded.
    Cancelling,
    /// Changes were discarded.
    Cancelled,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Net effect of a transaction on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Change {
    pub collection: CollectionId,
    pub kind: ChangeKind,
}

/// Objects touched by a transaction, folded to one change each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChangeLog {
    changes: BTreeMap<ObjectId, Change>,
}

impl ChangeLog {
    pub fn record_create(&mut self, collection: CollectionId, id: ObjectId) {
        self.changes.insert(
            id,
            Change {
                collection,
                kind: ChangeKind::Created,
            },
        );
    }

    /// Updating an object created in the same transaction keeps it created.
    pub fn record_update(&mut self, collection: CollectionId, id: ObjectId) {
        self.changes.entry(id).or_insert(Change {
            collection,
            kind: ChangeKind::Updated,
        });
    }

    /// Deleting an object created in the same transaction leaves no trace.
    pub fn record_delete(&mut self, collection: CollectionId, id: ObjectId) {
        match self.changes.get(&id).map(|c| c.kind) {
            Some(ChangeKind::Created) => {
                self.changes.remove(&id);
            }
            _ => {
                self.changes.insert(
                    id,
                    Change {
                        collection,
                        kind: ChangeKind::Deleted,
                    },
                );
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, Change)> + '_ {
        self.changes.iter().map(|(id, change)| (*id, *change))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Counts of (created, updated, deleted).
    pub fn counts(&self) -> (usize, usize, usize) {
        self.changes
            .values()
            .fold((0, 0, 0), |(c, u, d), change| match change.kind {
                ChangeKind::Created => (c + 1, u, d),
                ChangeKind::Updated => (c, u + 1, d),
                ChangeKind::Deleted => (c, u, d + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const PEOPLE: CollectionId = CollectionId::new(0);

    #[test]
    fn changes_fold_per_object() {
        let mut log = ChangeLog::default();
        let (a, b, c) = (ObjectId::new(1), ObjectId::new(2), ObjectId::new(3));

        log.record_create(PEOPLE, a);
        log.record_update(PEOPLE, a);
        log.record_update(PEOPLE, b);
        log.record_update(PEOPLE, b);
        log.record_update(PEOPLE, c);
        log.record_delete(PEOPLE, c);

        assert_eq!(log.counts(), (1, 1, 1));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn create_then_delete_cancels_out() {
        let mut log = ChangeLog::default();
        let id = ObjectId::new(7);
        log.record_create(PEOPLE, id);
        log.record_delete(PEOPLE, id);
        assert!(log.is_empty());
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Create,
        Update(usize),
        Delete(usize),
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Create),
            any::<usize>().prop_map(Step::Update),
            any::<usize>().prop_map(Step::Delete),
        ]
    }

    proptest! {
        // The folded log matches the difference between the objects that
        // existed at begin and the objects that exist at commit.
        #[test]
        fn log_matches_net_effect(steps in prop::collection::vec(step_strategy(), 0..40)) {
            let base: BTreeSet<ObjectId> = (1..=5).map(ObjectId::new).collect();
            let mut live: Vec<ObjectId> = base.iter().copied().collect();
            let mut touched = BTreeSet::new();
            let mut next = 6;
            let mut log = ChangeLog::default();

            for step in steps {
                match step {
                    Step::Create => {
                        let id = ObjectId::new(next);
                        next += 1;
                        live.push(id);
                        log.record_create(PEOPLE, id);
                    }
                    Step::Update(slot) if !live.is_empty() => {
                        let id = live[slot % live.len()];
                        touched.insert(id);
                        log.record_update(PEOPLE, id);
                    }
                    Step::Delete(slot) if !live.is_empty() => {
                        let id = live.remove(slot % live.len());
                        log.record_delete(PEOPLE, id);
                    }
                    _ => {}
                }
            }

            let live: BTreeSet<ObjectId> = live.into_iter().collect();
            let mut expected = BTreeMap::new();
            for id in live.difference(&base) {
                expected.insert(*id, ChangeKind::Created);
            }
            for id in base.difference(&live) {
                expected.insert(*id, ChangeKind::Deleted);
            }
            for id in base.intersection(&live).filter(|id| touched.contains(*id)) {
                expected.insert(*id, ChangeKind::Updated);
            }

            let actual: BTreeMap<ObjectId, ChangeKind> =
                log.iter().map(|(id, change)| (id, change.kind)).collect();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(TransactionState::Active.to_string(), "active");
        assert_eq!(TransactionState::Cancelled.to_string(), "cancelled");
    }
}
