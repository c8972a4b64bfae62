//! Comparison of a persisted schema with a declared one.

use crate::schema::descriptor::{ObjectSchema, SchemaDescriptor};
use std::fmt;

/// A difference in one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeChange {
    /// Declared but not persisted. Compatible.
    Added(String),
    /// Persisted but no longer declared. Requires a migration.
    Removed(String),
    /// Only `indexed` flags differ. Compatible.
    IndexesChanged(String),
    /// Stored layout differs. Requires a migration.
    LayoutChanged {
        /// Type name.
        name: String,
        /// What changed, one entry per property.
        details: Vec<String>,
    },
}

impl TypeChange {
    /// Returns true if this change cannot be applied without a migration.
    #[must_use]
    pub fn requires_migration(&self) -> bool {
        matches!(self, Self::Removed(_) | Self::LayoutChanged { .. })
    }
}

impl fmt::Display for TypeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(name) => write!(f, "type '{name}' added"),
            Self::Removed(name) => write!(f, "type '{name}' removed"),
            Self::IndexesChanged(name) => write!(f, "indexes of '{name}' changed"),
            Self::LayoutChanged { name, details } => {
                write!(f, "type '{name}' changed ({})", details.join(", "))
            }
        }
    }
}

/// Field-by-field difference between two schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    changes: Vec<TypeChange>,
}

impl SchemaDiff {
    /// Compares `persisted` with `declared`.
    #[must_use]
    pub fn between(persisted: &SchemaDescriptor, declared: &SchemaDescriptor) -> Self {
        let mut changes = Vec::new();

        for old in &persisted.object_types {
            match declared.get(&old.name) {
                None => changes.push(TypeChange::Removed(old.name.clone())),
                Some(new) => {
                    let details = layout_changes(old, new);
                    if !details.is_empty() {
                        changes.push(TypeChange::LayoutChanged {
                            name: old.name.clone(),
                            details,
                        });
                    } else if old != new {
                        changes.push(TypeChange::IndexesChanged(old.name.clone()));
                    }
                }
            }
        }

        for new in &declared.object_types {
            if persisted.get(&new.name).is_none() {
                changes.push(TypeChange::Added(new.name.clone()));
            }
        }

        Self { changes }
    }

    /// All differences found.
    #[must_use]
    pub fn changes(&self) -> &[TypeChange] {
        &self.changes
    }

    /// Returns true if the schemas are identical.
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns true if any change needs a migration callback.
    #[must_use]
    pub fn requires_migration(&self) -> bool {
        self.changes.iter().any(TypeChange::requires_migration)
    }

    /// Returns true if objects of the named type must be passed through
    /// the migration callback.
    #[must_use]
    pub fn is_layout_changed(&self, type_name: &str) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c, TypeChange::LayoutChanged { name, .. } if name == type_name))
    }

    /// One-line summary of the changes that need a migration.
    #[must_use]
    pub fn describe_incompatible(&self) -> String {
        self.changes
            .iter()
            .filter(|c| c.requires_migration())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn layout_changes(old: &ObjectSchema, new: &ObjectSchema) -> Vec<String> {
    let mut details = Vec::new();

    for (position, prop) in old.properties.iter().enumerate() {
        match new.properties.iter().position(|p| p.name == prop.name) {
            None => details.push(format!("'{}' removed", prop.name)),
            Some(new_position) => {
                let other = &new.properties[new_position];
                if other.kind != prop.kind {
                    details.push(format!(
                        "'{}' kind {} -> {}",
                        prop.name, prop.kind, other.kind
                    ));
                }
                if other.optional != prop.optional {
                    details.push(format!("'{}' optionality changed", prop.name));
                }
                if other.primary_key != prop.primary_key {
                    details.push(format!("'{}' primary key changed", prop.name));
                }
                if new_position != position {
                    details.push(format!("'{}' moved", prop.name));
                }
            }
        }
    }

    for prop in &new.properties {
        if old.get(&prop.name).is_none() {
            details.push(format!("'{}' added", prop.name));
        }
    }

    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::PropertyDescriptor;

    fn person(age_indexed: bool) -> ObjectSchema {
        let age = PropertyDescriptor::int("age");
        ObjectSchema::new("Person")
            .property(PropertyDescriptor::string("name"))
            .property(if age_indexed { age.indexed() } else { age })
    }

    #[test]
    fn identical() {
        let s = SchemaDescriptor::new().with_type(person(false));
        let diff = SchemaDiff::between(&s, &s);
        assert!(diff.is_identical());
        assert!(!diff.requires_migration());
    }

    #[test]
    fn added_type_and_index_are_compatible() {
        let old = SchemaDescriptor::new().with_type(person(false));
        let new = SchemaDescriptor::new()
            .with_type(person(true))
            .with_type(ObjectSchema::new("Dog").property(PropertyDescriptor::string("name")));

        let diff = SchemaDiff::between(&old, &new);
        assert_eq!(
            diff.changes(),
            &[
                TypeChange::IndexesChanged("Person".into()),
                TypeChange::Added("Dog".into()),
            ]
        );
        assert!(!diff.requires_migration());
    }

    #[test]
    fn property_changes_require_migration() {
        let old = SchemaDescriptor::new().with_type(person(false));
        let new = SchemaDescriptor::new().with_type(
            ObjectSchema::new("Person")
                .property(PropertyDescriptor::string("name"))
                .property(PropertyDescriptor::string("age"))
                .property(PropertyDescriptor::string("email").optional()),
        );

        let diff = SchemaDiff::between(&old, &new);
        assert!(diff.requires_migration());
        assert!(diff.is_layout_changed("Person"));
        let text = diff.describe_incompatible();
        assert!(text.contains("'age' kind int -> string"));
        assert!(text.contains("'email' added"));
    }

    #[test]
    fn removed_type_requires_migration() {
        let old = SchemaDescriptor::new().with_type(person(false));
        let diff = SchemaDiff::between(&old, &SchemaDescriptor::new());
        assert_eq!(diff.changes(), &[TypeChange::Removed("Person".into())]);
        assert!(diff.requires_migration());
    }
}
