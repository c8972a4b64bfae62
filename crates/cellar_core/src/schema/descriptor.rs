//! Declared object types.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of value a property holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// Reference to an object of the named type.
    Object(String),
}

impl PropertyKind {
    /// Returns true for kinds that can be stored in an ordered index.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        !matches!(self, Self::Object(_))
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Int => f.write_str("int"),
            Self::Bool => f.write_str("bool"),
            Self::Object(target) => f.write_str(target),
        }
    }
}

/// One declared property of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name, unique within its type.
    pub name: String,
    /// Value kind.
    pub kind: PropertyKind,
    /// Whether the property may hold `Null`.
    pub optional: bool,
    /// Whether the property is the type's primary key.
    pub primary_key: bool,
    /// Whether a secondary index is maintained for the property.
    pub indexed: bool,
}

impl PropertyDescriptor {
    /// Creates a required, unindexed property.
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            primary_key: false,
            indexed: false,
        }
    }

    /// Creates a required string property.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::String)
    }

    /// Creates a required integer property.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Int)
    }

    /// Creates a required boolean property.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Bool)
    }

    /// Creates a reference to `target`. References are always optional.
    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Object(target.into())).optional()
    }

    /// Parses the shorthand type notation.
    ///
    /// `"string"`, `"int"` and `"bool"` name scalar kinds; any other word is
    /// taken as the name of a declared type. A trailing `?` makes the
    /// property optional.
    ///
    /// # Errors
    ///
    /// Returns a schema error for an empty type string.
    pub fn parse(name: impl Into<String>, type_str: &str) -> CoreResult<Self> {
        let name = name.into();
        let trimmed = type_str.trim();
        let (base, optional) = match trimmed.strip_suffix('?') {
            Some(base) => (base.trim_end(), true),
            None => (trimmed, false),
        };
        if base.is_empty() {
            return Err(CoreError::schema(format!(
                "property '{name}' has an empty type"
            )));
        }
        let kind = match base {
            "string" => PropertyKind::String,
            "int" => PropertyKind::Int,
            "bool" => PropertyKind::Bool,
            other => PropertyKind::Object(other.to_string()),
        };
        Ok(Self {
            name,
            kind,
            optional,
            primary_key: false,
            indexed: false,
        })
    }

    /// Marks the property optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the property as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Requests a secondary index on the property.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Returns true if `other` has the same stored layout, ignoring
    /// the `indexed` flag.
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.optional == other.optional
            && self.primary_key == other.primary_key
    }
}

/// A declared object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Type name, unique within the schema.
    pub name: String,
    /// Properties in layout order.
    pub properties: Vec<PropertyDescriptor>,
}

impl ObjectSchema {
    /// Creates a type with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Builds a type from `(name, shorthand type)` pairs.
    ///
    /// # Errors
    ///
    /// Returns a schema error if any type string is malformed.
    pub fn from_shorthand(name: impl Into<String>, properties: &[(&str, &str)]) -> CoreResult<Self> {
        let mut schema = Self::new(name);
        for (prop, ty) in properties {
            schema.properties.push(PropertyDescriptor::parse(*prop, ty)?);
        }
        Ok(schema)
    }

    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Marks the named property as primary key.
    ///
    /// Has no effect if the type has no property of that name.
    #[must_use]
    pub fn primary_key(mut self, property: &str) -> Self {
        if let Some(p) = self.properties.iter_mut().find(|p| p.name == property) {
            p.primary_key = true;
        }
        self
    }

    /// Requests a secondary index on the named property.
    ///
    /// Has no effect if the type has no property of that name.
    #[must_use]
    pub fn index(mut self, property: &str) -> Self {
        if let Some(p) = self.properties.iter_mut().find(|p| p.name == property) {
            p.indexed = true;
        }
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == property)
    }
}

/// The full set of declared types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Declared types in declaration order.
    pub object_types: Vec<ObjectSchema>,
}

impl SchemaDescriptor {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a type.
    #[must_use]
    pub fn with_type(mut self, object_type: ObjectSchema) -> Self {
        self.object_types.push(object_type);
        self
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ObjectSchema> {
        self.object_types.iter().find(|t| t.name == name)
    }

    /// Returns the number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.object_types.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_types.is_empty()
    }
}
