//! BTree index implementation.

use crate::index::traits::OrderedIndex;
use crate::types::ObjectId;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Ordered secondary index from property value to object ids.
///
/// Supports equality lookups, range queries and prefix scans over string
/// keys. Several objects may share a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeIndex {
    property: usize,
    entries: BTreeMap<Value, BTreeSet<ObjectId>>,
    count: usize,
}

impl BTreeIndex {
    /// Creates an empty index over the property at `property`.
    #[must_use]
    pub fn new(property: usize) -> Self {
        Self {
            property,
            entries: BTreeMap::new(),
            count: 0,
        }
    }

    /// Adds an entry. Returns false if it was already present.
    pub fn insert(&mut self, key: Value, id: ObjectId) -> bool {
        let inserted = self.entries.entry(key).or_default().insert(id);
        if inserted {
            self.count += 1;
        }
        inserted
    }

    /// Removes an entry. Returns false if it was absent.
    pub fn remove(&mut self, key: &Value, id: ObjectId) -> bool {
        let Some(set) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = set.remove(&id);
        if removed {
            self.count -= 1;
            if set.is_empty() {
                self.entries.remove(key);
            }
        }
        removed
    }

    /// Moves an object from one key to another.
    pub fn update(&mut self, old: &Value, new: Value, id: ObjectId) {
        if *old != new {
            self.remove(old, id);
            self.insert(new, id);
        }
    }

    /// Returns true if the entry is present.
    #[must_use]
    pub fn contains(&self, key: &Value, id: ObjectId) -> bool {
        self.entries.get(key).is_some_and(|set| set.contains(&id))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Minimum key.
    #[must_use]
    pub fn min_key(&self) -> Option<&Value> {
        self.entries.keys().next()
    }

    /// Maximum key.
    #[must_use]
    pub fn max_key(&self) -> Option<&Value> {
        self.entries.keys().next_back()
    }
}

impl OrderedIndex for BTreeIndex {
    fn property(&self) -> usize {
        self.property
    }

    fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> BTreeSet<ObjectId> {
        if is_empty_range(lower, upper) {
            return BTreeSet::new();
        }
        self.entries
            .range::<Value, _>((lower, upper))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    fn prefix(&self, prefix: &str) -> BTreeSet<ObjectId> {
        self.entries
            .range::<Value, _>((Bound::Included(&Value::String(prefix.to_string())), Bound::Unbounded))
            .take_while(|(key, _)| key.as_str().is_some_and(|s| s.starts_with(prefix)))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Returns true for bounds that `BTreeMap::range` would reject.
pub(crate) fn is_empty_range(lower: Bound<&Value>, upper: Bound<&Value>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
        (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
