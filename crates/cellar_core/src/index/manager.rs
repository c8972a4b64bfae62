//! Per-collection index maintenance.
//!
//! Every collection carries the indexes its type layout declares: a unique
//! index for the primary key and one ordered index per indexed property.
//! Indexes are derived from the objects and rebuilt when a database opens.
//!
//! Mutations are check-then-apply: anything that can fail is checked before
//! the first index changes, so objects and indexes move together.

use crate::error::{CoreError, CoreResult};
use crate::index::btree::BTreeIndex;
use crate::index::traits::OrderedIndex;
use crate::index::unique::UniqueIndex;
use crate::schema::TypeLayout;
use crate::types::ObjectId;
use crate::value::Value;
use std::collections::BTreeMap;

/// The indexes of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionIndexes {
    type_name: String,
    primary: Option<UniqueIndex>,
    secondary: BTreeMap<usize, BTreeIndex>,
}

impl CollectionIndexes {
    /// Creates empty indexes for a type layout.
    #[must_use]
    pub fn for_layout(layout: &TypeLayout) -> Self {
        Self {
            type_name: layout.name().to_string(),
            primary: layout.primary_key().map(UniqueIndex::new),
            secondary: layout
                .indexed()
                .iter()
                .map(|&prop| (prop, BTreeIndex::new(prop)))
                .collect(),
        }
    }

    /// Builds indexes from existing objects.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if two objects share a primary key.
    pub fn rebuild<'a, I>(layout: &TypeLayout, objects: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (ObjectId, &'a [Value])>,
    {
        let mut indexes = Self::for_layout(layout);
        for (id, values) in objects {
            indexes.on_insert(id, values)?;
        }
        Ok(indexes)
    }

    /// Checks that inserting `values` as `id` would not break uniqueness.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if another object owns the primary key.
    pub fn check_insert(&self, id: ObjectId, values: &[Value]) -> CoreResult<()> {
        if let Some(primary) = &self.primary {
            let key = &values[primary.property()];
            if primary.lookup(key).is_some_and(|owner| owner != id) {
                return Err(CoreError::duplicate_key(&self.type_name, key.to_string()));
            }
        }
        Ok(())
    }

    /// Indexes a new object.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` without touching any index if the primary key
    /// is taken.
    pub fn on_insert(&mut self, id: ObjectId, values: &[Value]) -> CoreResult<()> {
        self.check_insert(id, values)?;
        if let Some(primary) = &mut self.primary {
            let key = values[primary.property()].clone();
            // Checked above.
            let _ = primary.insert(key, id);
        }
        for (prop, index) in &mut self.secondary {
            index.insert(values[*prop].clone(), id);
        }
        Ok(())
    }

    /// Moves an object's entries after the property at `property` changed
    /// from `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if `property` is the primary key and the new
    /// key is owned by another object.
    pub fn on_update(
        &mut self,
        id: ObjectId,
        property: usize,
        old: &Value,
        new: &Value,
    ) -> CoreResult<()> {
        if old == new {
            return Ok(());
        }
        if let Some(primary) = &mut self.primary {
            if primary.property() == property {
                if primary.lookup(new).is_some_and(|owner| owner != id) {
                    return Err(CoreError::duplicate_key(&self.type_name, new.to_string()));
                }
                primary.remove(old, id);
                let _ = primary.insert(new.clone(), id);
            }
        }
        if let Some(index) = self.secondary.get_mut(&property) {
            index.update(old, new.clone(), id);
        }
        Ok(())
    }

    /// Removes an object's entries.
    pub fn on_delete(&mut self, id: ObjectId, values: &[Value]) {
        if let Some(primary) = &mut self.primary {
            primary.remove(&values[primary.property()], id);
        }
        for (prop, index) in &mut self.secondary {
            index.remove(&values[*prop], id);
        }
    }

    /// Object owning a primary key.
    #[must_use]
    pub fn lookup_primary(&self, key: &Value) -> Option<ObjectId> {
        self.primary.as_ref().and_then(|p| p.lookup(key))
    }

    /// Ordered index over the property at `property`, if there is one.
    #[must_use]
    pub fn ordered(&self, property: usize) -> Option<&dyn OrderedIndex> {
        if let Some(primary) = &self.primary {
            if primary.property() == property {
                return Some(primary);
            }
        }
        self.secondary
            .get(&property)
            .map(|index| index as &dyn OrderedIndex)
    }

    /// Number of indexes, primary included.
    #[must_use]
    pub fn count(&self) -> usize {
        usize::from(self.primary.is_some()) + self.secondary.len()
    }

    /// Checks that one object is indexed exactly under its current values.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` on a missing or foreign entry.
    pub fn verify_object(&self, id: ObjectId, values: &[Value]) -> CoreResult<()> {
        if let Some(primary) = &self.primary {
            let key = &values[primary.property()];
            if primary.lookup(key) != Some(id) {
                return Err(CoreError::corruption(format!(
                    "primary key {key} of {id} in '{}' is not indexed to it",
                    self.type_name
                )));
            }
        }
        for (prop, index) in &self.secondary {
            if !index.contains(&values[*prop], id) {
                return Err(CoreError::corruption(format!(
                    "{id} in '{}' missing from index on property {prop}",
                    self.type_name
                )));
            }
        }
        Ok(())
    }

    /// Recomputes the indexes from `objects` and compares them with these.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if they differ and `DuplicateKey` if the objects
    /// themselves share a primary key.
    pub fn verify<'a, I>(&self, layout: &TypeLayout, objects: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (ObjectId, &'a [Value])>,
    {
        let expected = Self::rebuild(layout, objects)?;
        if expected != *self {
            return Err(CoreError::corruption(format!(
                "indexes of '{}' do not match its objects",
                self.type_name
            )));
        }
        Ok(())
    }
}
