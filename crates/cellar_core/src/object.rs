//! Object accessors.

use crate::error::{CoreError, CoreResult};
use crate::schema::{CompiledSchema, TypeLayout};
use crate::types::{CollectionId, ObjectId};
use crate::value::Value;
use crate::view::View;
use std::fmt;
use std::sync::Arc;

/// Accessor for one object as seen through one view.
///
/// An accessor does not own the object. Reads go through the view it came
/// from: after that view ends (the transaction finished, the snapshot was
/// released, the database closed) every read fails with `StaleAccessor`.
#[derive(Clone)]
pub struct ObjectRef {
    view: View,
    schema: Arc<CompiledSchema>,
    collection: CollectionId,
    id: ObjectId,
}

impl ObjectRef {
    pub(crate) fn new(
        view: View,
        schema: Arc<CompiledSchema>,
        collection: CollectionId,
        id: ObjectId,
    ) -> Self {
        Self {
            view,
            schema,
            collection,
            id,
        }
    }

    /// Engine-assigned id of the object.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.layout().name()
    }

    pub(crate) fn collection(&self) -> CollectionId {
        self.collection
    }

    pub(crate) fn view(&self) -> &View {
        &self.view
    }

    fn layout(&self) -> &TypeLayout {
        self.schema.layout(self.collection)
    }

    /// Returns true if the view is live and still contains the object.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.view
            .read(|state| state.contains(self.collection, self.id))
            .unwrap_or(false)
    }

    /// Reads one property.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` for undeclared names, `StaleAccessor` if
    /// the view ended and `ObjectNotFound` if the object was deleted in it.
    pub fn get(&self, property: &str) -> CoreResult<Value> {
        let index = self.layout().require_property(property)?;
        self.with_values(|values| values[index].clone())
    }

    /// Follows a reference property.
    ///
    /// Returns `None` when the property is null.
    ///
    /// # Errors
    ///
    /// As [`ObjectRef::get`], plus `TypeMismatch` when the property is not a
    /// reference.
    pub fn get_ref(&self, property: &str) -> CoreResult<Option<ObjectRef>> {
        let layout = self.layout();
        let index = layout.require_property(property)?;
        let target = layout.ref_target(index).ok_or_else(|| {
            CoreError::type_mismatch(layout.name(), property, "not an object reference")
        })?;
        let value = self.with_values(|values| values[index].clone())?;
        Ok(value.as_ref_id().map(|id| {
            Self::new(self.view.clone(), Arc::clone(&self.schema), target, id)
        }))
    }

    /// All property values in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` or `ObjectNotFound` as [`ObjectRef::get`].
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        self.with_values(<[Value]>::to_vec)
    }

    /// Property names paired with their values.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` or `ObjectNotFound` as [`ObjectRef::get`].
    pub fn to_named(&self) -> CoreResult<Vec<(String, Value)>> {
        let names = self.layout().properties().iter().map(|p| p.name.clone());
        Ok(names.zip(self.values()?).collect())
    }

    fn with_values<R>(&self, f: impl FnOnce(&[Value]) -> R) -> CoreResult<R> {
        self.view
            .read(|state| state.get(self.collection, self.id).map(f))?
            .ok_or_else(|| {
                CoreError::object_not_found(format!(
                    "{} of type '{}' is not in this view",
                    self.id,
                    self.type_name()
                ))
            })
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.view.id() == other.view.id()
            && self.collection == other.collection
            && self.id == other.id
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type", &self.type_name())
            .field("id", &self.id)
            .field("view", &self.view.id())
            .finish()
    }
}

impl From<&ObjectRef> for Value {
    fn from(object: &ObjectRef) -> Self {
        Value::Ref(object.id)
    }
}
