//! In-memory object state of one version.
//!
//! A [`State`] holds every collection of one snapshot. Collections sit
//! behind `Arc`s so that a write transaction copies only the collections it
//! touches; untouched collections stay shared with the base snapshot.

use crate::error::{CoreError, CoreResult};
use crate::index::CollectionIndexes;
use crate::schema::{CompiledSchema, MappedObject, TypeLayout};
use crate::types::{CollectionId, ObjectId, SnapshotVersion};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Objects and indexes of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CollectionState {
    pub objects: BTreeMap<ObjectId, Vec<Value>>,
    pub indexes: CollectionIndexes,
}

impl CollectionState {
    pub fn empty(layout: &TypeLayout) -> Self {
        Self {
            objects: BTreeMap::new(),
            indexes: CollectionIndexes::for_layout(layout),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn get(&self, id: ObjectId) -> Option<&[Value]> {
        self.objects.get(&id).map(Vec::as_slice)
    }

    /// Objects as `(id, values)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &[Value])> {
        self.objects.iter().map(|(id, values)| (*id, values.as_slice()))
    }

    /// Adds an object, indexing it first.
    pub fn insert(&mut self, id: ObjectId, values: Vec<Value>) -> CoreResult<()> {
        self.indexes.on_insert(id, &values)?;
        self.objects.insert(id, values);
        Ok(())
    }

    /// Replaces one property value.
    pub fn update(&mut self, id: ObjectId, property: usize, value: Value) -> CoreResult<Value> {
        let values = self
            .objects
            .get_mut(&id)
            .ok_or_else(|| CoreError::object_not_found(format!("{id} does not exist")))?;
        self.indexes.on_update(id, property, &values[property], &value)?;
        Ok(std::mem::replace(&mut values[property], value))
    }

    /// Removes an object and its index entries.
    pub fn remove(&mut self, id: ObjectId) -> Option<Vec<Value>> {
        let values = self.objects.remove(&id)?;
        self.indexes.on_delete(id, &values);
        Some(values)
    }
}

/// All collections at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct State {
    pub version: SnapshotVersion,
    pub collections: Vec<Arc<CollectionState>>,
    pub next_object_id: u64,
}

impl State {
    /// State of a database nothing was committed to.
    pub fn empty(schema: &CompiledSchema) -> Self {
        Self {
            version: SnapshotVersion::new(0),
            collections: schema
                .types()
                .iter()
                .map(|layout| Arc::new(CollectionState::empty(layout)))
                .collect(),
            next_object_id: 1,
        }
    }

    /// Builds the state of a recovered version, rebuilding all indexes.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if stored objects share a primary key.
    pub fn build(
        schema: &CompiledSchema,
        version: SnapshotVersion,
        next_object_id: u64,
        objects: Vec<MappedObject>,
    ) -> CoreResult<Self> {
        let mut collections: Vec<CollectionState> =
            schema.types().iter().map(CollectionState::empty).collect();
        let mut max_id = 0;
        for object in objects {
            max_id = max_id.max(object.id.as_u64());
            collections[object.collection.index()].insert(object.id, object.values)?;
        }
        Ok(Self {
            version,
            collections: collections.into_iter().map(Arc::new).collect(),
            next_object_id: next_object_id.max(max_id + 1),
        })
    }

    pub fn collection(&self, id: CollectionId) -> &CollectionState {
        &self.collections[id.index()]
    }

    /// Mutable access, copying the collection if it is shared.
    pub fn collection_mut(&mut self, id: CollectionId) -> &mut CollectionState {
        Arc::make_mut(&mut self.collections[id.index()])
    }

    pub fn get(&self, collection: CollectionId, id: ObjectId) -> Option<&[Value]> {
        self.collection(collection).get(id)
    }

    pub fn contains(&self, collection: CollectionId, id: ObjectId) -> bool {
        self.collection(collection).objects.contains_key(&id)
    }

    pub fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_object_id);
        self.next_object_id += 1;
        id
    }

    pub fn object_count(&self) -> usize {
        self.collections.iter().map(|c| c.len()).sum()
    }
}
