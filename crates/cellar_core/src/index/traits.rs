//! Index lookup trait.

use crate::types::ObjectId;
use crate::value::Value;
use std::collections::BTreeSet;
use std::ops::Bound;

/// Read access shared by ordered indexes.
///
/// Lookups return ids in ascending order.
pub trait OrderedIndex {
    /// Position of the indexed property in the type layout.
    fn property(&self) -> usize;

    /// Objects whose key lies within the bounds.
    fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> BTreeSet<ObjectId>;

    /// Objects whose key equals `key`.
    fn get(&self, key: &Value) -> BTreeSet<ObjectId> {
        self.range(Bound::Included(key), Bound::Included(key))
    }

    /// Objects whose string key starts with `prefix`.
    fn prefix(&self, prefix: &str) -> BTreeSet<ObjectId>;

    /// Number of indexed objects.
    fn len(&self) -> usize;

    /// Returns true if nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
