//! Migration of persisted objects to a new schema.
//!
//! When the declared schema changes the stored layout of a type, every
//! object of that type is handed to a [`Migration`] callback together with a
//! pre-filled object in the new layout. Properties whose name and kind did
//! not change are copied over; everything else starts as `Null`.
//!
//! ```rust,ignore
//! let rename = |type_name: &str, old: &MigrationObject, new: &mut MigrationObject| {
//!     if type_name == "Person" {
//!         if let Some(name) = old.get("name") {
//!             new.set("full_name", name.clone())?;
//!         }
//!     }
//!     Ok(())
//! };
//! let db = Database::open_with_options(path, schema, Config::default(), Some(&rename))?;
//! ```

use crate::error::{CoreError, CoreResult};
use crate::schema::compiled::{CompiledSchema, TypeLayout};
use crate::schema::descriptor::{ObjectSchema, SchemaDescriptor};
use crate::schema::diff::SchemaDiff;
use crate::types::{CollectionId, ObjectId};
use crate::value::Value;
use tracing::{debug, info};

/// A named view of one object's values during migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationObject {
    type_name: String,
    names: Vec<String>,
    values: Vec<Value>,
}

impl MigrationObject {
    fn new(type_name: &str, names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            type_name: type_name.to_string(),
            names,
            values,
        }
    }

    /// Type the object belongs to.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Property names in layout order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns the value of the named property.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.position(property).map(|i| &self.values[i])
    }

    /// Sets the value of the named property.
    ///
    /// The value is checked against the new layout after the callback
    /// returns, not here.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` if the object has no such property.
    pub fn set(&mut self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        let index = self
            .position(property)
            .ok_or_else(|| CoreError::unknown_property(&self.type_name, property))?;
        self.values[index] = value.into();
        Ok(())
    }

    fn position(&self, property: &str) -> Option<usize> {
        self.names.iter().position(|n| n == property)
    }
}

/// Callback that rewrites objects whose type layout changed.
pub trait Migration {
    /// Fills `new` from `old`. Called once per object of each changed type.
    ///
    /// # Errors
    ///
    /// Any error aborts the open; nothing is written.
    fn migrate_object(
        &self,
        type_name: &str,
        old: &MigrationObject,
        new: &mut MigrationObject,
    ) -> CoreResult<()>;
}

impl<F> Migration for F
where
    F: Fn(&str, &MigrationObject, &mut MigrationObject) -> CoreResult<()>,
{
    fn migrate_object(
        &self,
        type_name: &str,
        old: &MigrationObject,
        new: &mut MigrationObject,
    ) -> CoreResult<()> {
        self(type_name, old, new)
    }
}

/// An object as read from the file, in the persisted layout.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub id: ObjectId,
    pub collection: CollectionId,
    pub values: Vec<Value>,
}

/// An object mapped onto the declared schema.
#[derive(Debug, Clone)]
pub(crate) struct MappedObject {
    pub id: ObjectId,
    pub collection: CollectionId,
    pub values: Vec<Value>,
}

/// Maps stored objects onto the declared schema, running `migration` for
/// every object of a type whose layout changed.
///
/// Objects of removed types are dropped. Fails with `MigrationRequired`
/// when the change is incompatible and no migration is given.
pub(crate) fn map_objects(
    persisted: &SchemaDescriptor,
    declared: &CompiledSchema,
    diff: &SchemaDiff,
    objects: Vec<StoredObject>,
    migration: Option<&dyn Migration>,
) -> CoreResult<Vec<MappedObject>> {
    if diff.requires_migration() && migration.is_none() {
        return Err(CoreError::migration_required(diff.describe_incompatible()));
    }

    let mut mapped = Vec::with_capacity(objects.len());
    let mut migrated = 0usize;
    let mut dropped = 0usize;

    for object in objects {
        let old_type = persisted
            .object_types
            .get(object.collection.index())
            .ok_or_else(|| {
                CoreError::corruption(format!(
                    "{} belongs to unknown collection {}",
                    object.id, object.collection
                ))
            })?;

        let Some(layout) = declared
            .collection_id(&old_type.name)
            .map(|id| declared.layout(id))
        else {
            dropped += 1;
            continue;
        };

        let values = match migration {
            Some(migration) if diff.is_layout_changed(&old_type.name) => {
                migrated += 1;
                migrate_one(old_type, layout, &object, migration)?
            }
            _ => object.values,
        };

        mapped.push(MappedObject {
            id: object.id,
            collection: layout.id(),
            values,
        });
    }

    if migrated > 0 || dropped > 0 {
        info!(migrated, dropped, "migrated objects to declared schema");
    } else {
        debug!(objects = mapped.len(), "schema mapping needed no migration");
    }

    Ok(mapped)
}

fn migrate_one(
    old_type: &ObjectSchema,
    layout: &TypeLayout,
    object: &StoredObject,
    migration: &dyn Migration,
) -> CoreResult<Vec<Value>> {
    let old_names = old_type.properties.iter().map(|p| p.name.clone()).collect();
    let old = MigrationObject::new(&old_type.name, old_names, object.values.clone());

    let new_names = layout.properties().iter().map(|p| p.name.clone()).collect();
    let prefilled = layout
        .properties()
        .iter()
        .map(|prop| {
            old_type
                .properties
                .iter()
                .position(|p| p.name == prop.name && p.kind == prop.kind)
                .and_then(|i| object.values.get(i).cloned())
                .unwrap_or(Value::Null)
        })
        .collect();
    let mut new = MigrationObject::new(layout.name(), new_names, prefilled);

    migration.migrate_object(&old_type.name, &old, &mut new)?;

    layout.check_values(&new.values).map_err(|e| {
        CoreError::schema(format!(
            "migration left {} of '{}' invalid: {e}",
            object.id,
            layout.name()
        ))
    })?;
    Ok(new.values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::descriptor::PropertyDescriptor;

    fn v1() -> SchemaDescriptor {
        SchemaDescriptor::new().with_type(
            ObjectSchema::new("Person")
                .property(PropertyDescriptor::string("first"))
                .property(PropertyDescriptor::string("last"))
                .property(PropertyDescriptor::int("age")),
        )
    }

    fn v2() -> SchemaDescriptor {
        SchemaDescriptor::new().with_type(
            ObjectSchema::new("Person")
                .property(PropertyDescriptor::string("name"))
                .property(PropertyDescriptor::int("age")),
        )
    }

    fn stored() -> Vec<StoredObject> {
        vec![StoredObject {
            id: ObjectId::new(1),
            collection: CollectionId::new(0),
            values: vec!["Ada".into(), "Lovelace".into(), 36.into()],
        }]
    }

    fn join_names(
        _type_name: &str,
        old: &MigrationObject,
        new: &mut MigrationObject,
    ) -> CoreResult<()> {
        let first = old.get("first").and_then(Value::as_str).unwrap_or_default();
        let last = old.get("last").and_then(Value::as_str).unwrap_or_default();
        new.set("name", format!("{first} {last}"))
    }

    #[test]
    fn incompatible_without_migration_fails() {
        let declared = CompiledSchema::compile(&v2()).unwrap();
        let diff = SchemaDiff::between(&v1(), &v2());
        let err = map_objects(&v1(), &declared, &diff, stored(), None).unwrap_err();
        assert!(matches!(err, CoreError::MigrationRequired { .. }));
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn migration_prefills_and_rewrites() {
        let declared = CompiledSchema::compile(&v2()).unwrap();
        let diff = SchemaDiff::between(&v1(), &v2());
        let mapped = map_objects(&v1(), &declared, &diff, stored(), Some(&join_names)).unwrap();

        assert_eq!(mapped.len(), 1);
        assert_eq!(
            mapped[0].values,
            vec![Value::from("Ada Lovelace"), Value::from(36)]
        );
    }

    #[test]
    fn invalid_migration_result_fails() {
        let declared = CompiledSchema::compile(&v2()).unwrap();
        let diff = SchemaDiff::between(&v1(), &v2());
        let noop = |_: &str, _: &MigrationObject, _: &mut MigrationObject| -> CoreResult<()> {
            Ok(())
        };
        // "name" is required and stays Null.
        let err = map_objects(&v1(), &declared, &diff, stored(), Some(&noop)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn removed_type_objects_are_dropped() {
        let declared = CompiledSchema::compile(&SchemaDescriptor::new()).unwrap();
        let diff = SchemaDiff::between(&v1(), &SchemaDescriptor::new());
        let noop = |_: &str, _: &MigrationObject, _: &mut MigrationObject| -> CoreResult<()> {
            Ok(())
        };
        let mapped = map_objects(&v1(), &declared, &diff, stored(), Some(&noop)).unwrap();
        assert!(mapped.is_empty());
    }

    #[test]
    fn set_unknown_property_fails() {
        let mut object = MigrationObject::new("Person", vec!["name".into()], vec![Value::Null]);
        assert!(object.set("nickname", "x").is_err());
        object.set("name", "y").unwrap();
        assert_eq!(object.get("name"), Some(&Value::from("y")));
        assert_eq!(object.property_names().collect::<Vec<_>>(), vec!["name"]);
    }
}
