//! Primary-key index.

use crate::index::btree::is_empty_range;
use crate::index::traits::OrderedIndex;
use crate::types::ObjectId;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Unique index from primary-key value to object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    property: usize,
    entries: BTreeMap<Value, ObjectId>,
}

impl UniqueIndex {
    /// Creates an empty index over the property at `property`.
    #[must_use]
    pub fn new(property: usize) -> Self {
        Self {
            property,
            entries: BTreeMap::new(),
        }
    }

    /// Object owning `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &Value) -> Option<ObjectId> {
        self.entries.get(key).copied()
    }

    /// Adds a key. Returns the current owner instead if the key is taken
    /// by another object.
    pub fn insert(&mut self, key: Value, id: ObjectId) -> Result<(), ObjectId> {
        match self.entries.get(&key) {
            Some(owner) if *owner != id => Err(*owner),
            _ => {
                self.entries.insert(key, id);
                Ok(())
            }
        }
    }

    /// Removes a key if it belongs to `id`.
    pub fn remove(&mut self, key: &Value, id: ObjectId) -> bool {
        if self.entries.get(key) == Some(&id) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }
}

impl OrderedIndex for UniqueIndex {
    fn property(&self) -> usize {
        self.property
    }

    fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> BTreeSet<ObjectId> {
        if is_empty_range(lower, upper) {
            return BTreeSet::new();
        }
        self.entries
            .range::<Value, _>((lower, upper))
            .map(|(_, id)| *id)
            .collect()
    }

    fn prefix(&self, prefix: &str) -> BTreeSet<ObjectId> {
        self.entries
            .range::<Value, _>((Bound::Included(&Value::String(prefix.to_string())), Bound::Unbounded))
            .take_while(|(key, _)| key.as_str().is_some_and(|s| s.starts_with(prefix)))
            .map(|(_, id)| *id)
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
