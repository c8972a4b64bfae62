//! Validated, compiled schema.

use crate::error::{CoreError, CoreResult};
use crate::schema::descriptor::{PropertyDescriptor, PropertyKind, SchemaDescriptor};
use crate::types::CollectionId;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

/// Fixed layout of one object type.
///
/// Objects of the type store one [`Value`] per property, in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    id: CollectionId,
    name: String,
    properties: Vec<PropertyDescriptor>,
    by_name: HashMap<String, usize>,
    primary_key: Option<usize>,
    indexed: Vec<usize>,
    ref_targets: Vec<Option<CollectionId>>,
}

impl TypeLayout {
    /// Collection holding objects of this type.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties in layout order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Position of the named property.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Position of the named property, or `UnknownProperty`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` if the type has no such property.
    pub fn require_property(&self, name: &str) -> CoreResult<usize> {
        self.property_index(name)
            .ok_or_else(|| CoreError::unknown_property(&self.name, name))
    }

    /// Position of the primary key, if declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<usize> {
        self.primary_key
    }

    /// Positions of properties with a secondary index.
    #[must_use]
    pub fn indexed(&self) -> &[usize] {
        &self.indexed
    }

    /// Collection referenced by the property at `index`, if it is a reference.
    #[must_use]
    pub fn ref_target(&self, index: usize) -> Option<CollectionId> {
        self.ref_targets.get(index).copied().flatten()
    }

    /// Checks that `value` may be stored in the property at `index`.
    ///
    /// Reference targets are not checked here; that needs the object state.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value's kind or nullability is wrong.
    pub fn check_value(&self, index: usize, value: &Value) -> CoreResult<()> {
        let prop = &self.properties[index];
        let ok = match (&prop.kind, value) {
            (_, Value::Null) => prop.optional,
            (PropertyKind::String, Value::String(_))
            | (PropertyKind::Int, Value::Int(_))
            | (PropertyKind::Bool, Value::Bool(_))
            | (PropertyKind::Object(_), Value::Ref(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            let expected = if prop.optional {
                format!("{}?", prop.kind)
            } else {
                prop.kind.to_string()
            };
            Err(CoreError::type_mismatch(
                &self.name,
                &prop.name,
                format!("expected {expected}, got {}", value.kind_name()),
            ))
        }
    }

    /// Checks a complete set of values against the layout.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` on a wrong value count or kind.
    pub fn check_values(&self, values: &[Value]) -> CoreResult<()> {
        if values.len() != self.properties.len() {
            return Err(CoreError::type_mismatch(
                &self.name,
                "*",
                format!(
                    "expected {} values, got {}",
                    self.properties.len(),
                    values.len()
                ),
            ));
        }
        for (index, value) in values.iter().enumerate() {
            self.check_value(index, value)?;
        }
        Ok(())
    }

    /// Orders named values into layout order; missing optional properties
    /// become `Null`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` for undeclared names and `TypeMismatch`
    /// when a required property is missing.
    pub fn values_from_named<'a, I>(&self, named: I) -> CoreResult<Vec<Value>>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let mut values: Vec<Option<Value>> = vec![None; self.properties.len()];
        for (name, value) in named {
            let index = self.require_property(name)?;
            values[index] = Some(value);
        }
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Some(value) => Ok(value),
                None if self.properties[index].optional => Ok(Value::Null),
                None => Err(CoreError::type_mismatch(
                    &self.name,
                    &self.properties[index].name,
                    "required property missing",
                )),
            })
            .collect()
    }
}

/// A schema that passed validation, with one [`TypeLayout`] per type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSchema {
    descriptor: SchemaDescriptor,
    types: Vec<TypeLayout>,
    by_name: HashMap<String, CollectionId>,
}

impl CompiledSchema {
    /// Validates and compiles a declared schema.
    ///
    /// # Errors
    ///
    /// Returns a schema error for duplicate or empty names, more than one
    /// primary key, an optional or non-scalar primary key, an index on a
    /// reference, a reference to an undeclared type, or a required
    /// reference.
    pub fn compile(descriptor: &SchemaDescriptor) -> CoreResult<Self> {
        let mut by_name = HashMap::with_capacity(descriptor.object_types.len());
        for (position, object_type) in descriptor.object_types.iter().enumerate() {
            if object_type.name.trim().is_empty() {
                return Err(CoreError::schema("object type name must not be empty"));
            }
            let id = CollectionId::new(u32::try_from(position).map_err(|_| {
                CoreError::schema("too many object types")
            })?);
            if by_name.insert(object_type.name.clone(), id).is_some() {
                return Err(CoreError::schema(format!(
                    "duplicate object type '{}'",
                    object_type.name
                )));
            }
        }

        let mut types = Vec::with_capacity(descriptor.object_types.len());
        for (position, object_type) in descriptor.object_types.iter().enumerate() {
            let type_name = &object_type.name;
            let mut seen = HashSet::new();
            let mut layout_by_name = HashMap::new();
            let mut primary_key = None;
            let mut indexed = Vec::new();
            let mut ref_targets = Vec::with_capacity(object_type.properties.len());

            for (index, prop) in object_type.properties.iter().enumerate() {
                if prop.name.trim().is_empty() {
                    return Err(CoreError::schema(format!(
                        "type '{type_name}' has a property with an empty name"
                    )));
                }
                if !seen.insert(prop.name.as_str()) {
                    return Err(CoreError::schema(format!(
                        "duplicate property '{}' in type '{type_name}'",
                        prop.name
                    )));
                }
                layout_by_name.insert(prop.name.clone(), index);

                if prop.primary_key {
                    if primary_key.is_some() {
                        return Err(CoreError::schema(format!(
                            "type '{type_name}' declares more than one primary key"
                        )));
                    }
                    if prop.optional {
                        return Err(CoreError::schema(format!(
                            "primary key '{type_name}.{}' must not be optional",
                            prop.name
                        )));
                    }
                    if !matches!(prop.kind, PropertyKind::String | PropertyKind::Int) {
                        return Err(CoreError::schema(format!(
                            "primary key '{type_name}.{}' must be string or int, not {}",
                            prop.name, prop.kind
                        )));
                    }
                    primary_key = Some(index);
                }

                if prop.indexed {
                    if !prop.kind.is_orderable() {
                        return Err(CoreError::schema(format!(
                            "property '{type_name}.{}' of kind {} cannot be indexed",
                            prop.name, prop.kind
                        )));
                    }
                    // The primary key already has a unique index.
                    if !prop.primary_key {
                        indexed.push(index);
                    }
                }

                match &prop.kind {
                    PropertyKind::Object(target) => {
                        let target_id = by_name.get(target).copied().ok_or_else(|| {
                            CoreError::schema(format!(
                                "property '{type_name}.{}' references undeclared type '{target}'",
                                prop.name
                            ))
                        })?;
                        if !prop.optional {
                            return Err(CoreError::schema(format!(
                                "reference '{type_name}.{}' must be optional",
                                prop.name
                            )));
                        }
                        ref_targets.push(Some(target_id));
                    }
                    _ => ref_targets.push(None),
                }
            }

            types.push(TypeLayout {
                id: CollectionId::new(position as u32),
                name: type_name.clone(),
                properties: object_type.properties.clone(),
                by_name: layout_by_name,
                primary_key,
                indexed,
                ref_targets,
            });
        }

        Ok(Self {
            descriptor: descriptor.clone(),
            types,
            by_name,
        })
    }

    /// The descriptor this schema was compiled from.
    #[must_use]
    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// All layouts, indexed by collection.
    #[must_use]
    pub fn types(&self) -> &[TypeLayout] {
        &self.types
    }

    /// Number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Layout of a collection.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this schema.
    #[must_use]
    pub fn layout(&self, id: CollectionId) -> &TypeLayout {
        &self.types[id.index()]
    }

    /// Looks up a collection by type name.
    #[must_use]
    pub fn collection_id(&self, name: &str) -> Option<CollectionId> {
        self.by_name.get(name).copied()
    }

    /// Layout of the named type, or `UnknownType`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if no such type is declared.
    pub fn layout_by_name(&self, name: &str) -> CoreResult<&TypeLayout> {
        self.collection_id(name)
            .map(|id| self.layout(id))
            .ok_or_else(|| CoreError::unknown_type(name))
    }
}
