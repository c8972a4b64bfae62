//! Predicates bound to a type layout.

use crate::error::{CoreError, CoreResult};
use crate::index::CollectionIndexes;
use crate::query::parser::{Comparison, Operator};
use crate::schema::{PropertyKind, TypeLayout};
use crate::types::ObjectId;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;

/// A comparison checked against a layout, addressing its property by
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundComparison {
    property: usize,
    op: Operator,
    case_insensitive: bool,
    value: Value,
}

impl BoundComparison {
    /// Binds a parsed comparison to `layout`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown properties, literals of the wrong
    /// kind and operators the property kind does not support.
    pub fn bind(layout: &TypeLayout, comparison: Comparison) -> CoreResult<Self> {
        let Comparison {
            property,
            op,
            case_insensitive,
            value,
        } = comparison;
        let index = layout.property_index(&property).ok_or_else(|| {
            CoreError::invalid_query(format!(
                "'{}' has no property '{property}'",
                layout.name()
            ))
        })?;
        let kind = &layout.properties()[index].kind;
        let reject = |why: &str| {
            Err(CoreError::invalid_query(format!(
                "{property} {op} {value}: {why}"
            )))
        };

        let kind_ok = match (kind, &value) {
            (_, Value::Null) => true,
            (PropertyKind::String, Value::String(_))
            | (PropertyKind::Int, Value::Int(_))
            | (PropertyKind::Bool, Value::Bool(_)) => true,
            _ => false,
        };
        if !kind_ok {
            return reject(&format!("{kind} property compared with {}", value.kind_name()));
        }

        match kind {
            PropertyKind::Object(_) => {
                if !value.is_null() || !matches!(op, Operator::Equal | Operator::NotEqual) {
                    return reject("object references only support == null and != null");
                }
            }
            PropertyKind::Bool if !matches!(op, Operator::Equal | Operator::NotEqual) => {
                return reject("bool properties only support == and !=");
            }
            PropertyKind::Int if op.is_string_op() => {
                return reject("string operator on an int property");
            }
            _ => {}
        }
        if op.is_string_op() && value.is_null() {
            return reject("string operators need a string literal");
        }
        if case_insensitive && (*kind != PropertyKind::String || op.is_ordering()) {
            return reject("[c] applies to string equality and string operators");
        }

        Ok(Self {
            property: index,
            op,
            case_insensitive,
            value,
        })
    }

    /// Evaluates the comparison against an object's values.
    pub fn matches(&self, values: &[Value]) -> bool {
        let actual = &values[self.property];
        match self.op {
            Operator::Equal => self.equals(actual),
            Operator::NotEqual => !self.equals(actual),
            Operator::Less
            | Operator::LessOrEqual
            | Operator::Greater
            | Operator::GreaterOrEqual => {
                if actual.is_null() || self.value.is_null() {
                    return false;
                }
                let ordering = actual.cmp(&self.value);
                match self.op {
                    Operator::Less => ordering == Ordering::Less,
                    Operator::LessOrEqual => ordering != Ordering::Greater,
                    Operator::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
            Operator::Contains | Operator::BeginsWith | Operator::EndsWith => {
                let (Some(haystack), Some(needle)) = (actual.as_str(), self.value.as_str()) else {
                    return false;
                };
                let (haystack, needle) = self.fold(haystack, needle);
                match self.op {
                    Operator::Contains => haystack.contains(needle.as_str()),
                    Operator::BeginsWith => haystack.starts_with(needle.as_str()),
                    _ => haystack.ends_with(needle.as_str()),
                }
            }
        }
    }

    fn equals(&self, actual: &Value) -> bool {
        match (actual.as_str(), self.value.as_str()) {
            (Some(a), Some(b)) if self.case_insensitive => {
                let (a, b) = self.fold(a, b);
                a == b
            }
            _ => *actual == self.value,
        }
    }

    fn fold(&self, a: &str, b: &str) -> (String, String) {
        if self.case_insensitive {
            (a.to_lowercase(), b.to_lowercase())
        } else {
            (a.to_string(), b.to_string())
        }
    }

    /// Ids an index can produce for this comparison, or `None` when it
    /// needs a full scan.
    pub fn candidates(&self, indexes: &CollectionIndexes) -> Option<BTreeSet<ObjectId>> {
        if self.case_insensitive {
            return None;
        }
        let index = indexes.ordered(self.property)?;
        let value = &self.value;
        let null = Value::Null;
        if self.op.is_ordering() && value.is_null() {
            return Some(BTreeSet::new());
        }
        let above_null = Bound::Excluded(&null);
        let ids = match self.op {
            Operator::Equal => index.get(value),
            Operator::Less => index.range(above_null, Bound::Excluded(value)),
            Operator::LessOrEqual => index.range(above_null, Bound::Included(value)),
            Operator::Greater => index.range(Bound::Excluded(value), Bound::Unbounded),
            Operator::GreaterOrEqual => index.range(Bound::Included(value), Bound::Unbounded),
            Operator::BeginsWith => index.prefix(value.as_str()?),
            Operator::NotEqual | Operator::Contains | Operator::EndsWith => return None,
        };
        Some(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse;
    use crate::schema::{CompiledSchema, ObjectSchema, PropertyDescriptor, SchemaDescriptor};

    fn schema() -> CompiledSchema {
        CompiledSchema::compile(
            &SchemaDescriptor::new().with_type(
                ObjectSchema::new("Person")
                    .property(PropertyDescriptor::string("name").indexed())
                    .property(PropertyDescriptor::int("age").optional())
                    .property(PropertyDescriptor::bool("active"))
                    .property(PropertyDescriptor::object("friend", "Person")),
            ),
        )
        .unwrap()
    }

    fn bind(input: &str) -> CoreResult<BoundComparison> {
        let schema = schema();
        let comparison = parse(input)?.remove(0);
        BoundComparison::bind(&schema.types()[0], comparison)
    }

    fn person(name: &str, age: Option<i64>) -> Vec<Value> {
        vec![name.into(), age.into(), true.into(), Value::Null]
    }

    #[test]
    fn binding_rejects_bad_terms() {
        for input in [
            "nickname == 'x'",
            "age == 'x'",
            "name > 3",
            "active > true",
            "friend == 3",
            "friend != 'x'",
            "age CONTAINS 1",
            "name CONTAINS null",
            "age ==[c] 3",
            "name <[c] 'x'",
        ] {
            let err = bind(input).unwrap_err();
            assert!(matches!(err, CoreError::InvalidQuery { .. }), "{input}");
        }
        assert!(bind("friend == null").is_ok());
        assert!(bind("age < null").is_ok());
    }

    #[test]
    fn ordering_with_null_is_false() {
        let unknown_age = person("Ann", None);
        assert!(!bind("age > 1").unwrap().matches(&unknown_age));
        assert!(!bind("age < 1").unwrap().matches(&unknown_age));
        assert!(!bind("age <= null").unwrap().matches(&person("Bo", Some(3))));
        assert!(bind("age == null").unwrap().matches(&unknown_age));
        assert!(bind("age != 3").unwrap().matches(&unknown_age));
    }

    #[test]
    fn string_operators() {
        let jo = person("Johanna", Some(30));
        assert!(bind("name BEGINSWITH 'Jo'").unwrap().matches(&jo));
        assert!(!bind("name BEGINSWITH 'jo'").unwrap().matches(&jo));
        assert!(bind("name BEGINSWITH[c] 'jo'").unwrap().matches(&jo));
        assert!(bind("name CONTAINS 'han'").unwrap().matches(&jo));
        assert!(bind("name ENDSWITH[c] 'ANNA'").unwrap().matches(&jo));
        assert!(bind("name ==[c] 'johanna'").unwrap().matches(&jo));
        assert!(!bind("name == 'johanna'").unwrap().matches(&jo));
    }

    #[test]
    fn index_candidates() {
        let schema = schema();
        let layout = &schema.types()[0];
        let objects = [
            (ObjectId::new(1), person("Ann", None)),
            (ObjectId::new(2), person("Anton", None)),
            (ObjectId::new(3), person("Bea", None)),
        ];
        let indexes =
            CollectionIndexes::rebuild(layout, objects.iter().map(|(id, v)| (*id, v.as_slice())))
                .unwrap();

        let prefix = bind("name BEGINSWITH 'An'").unwrap();
        assert_eq!(
            prefix.candidates(&indexes),
            Some(BTreeSet::from([ObjectId::new(1), ObjectId::new(2)]))
        );
        let greater = bind("name > 'Anton'").unwrap();
        assert_eq!(greater.candidates(&indexes), Some(BTreeSet::from([ObjectId::new(3)])));
        assert_eq!(bind("name CONTAINS 'n'").unwrap().candidates(&indexes), None);
        assert_eq!(bind("age > 3").unwrap().candidates(&indexes), None);
        assert_eq!(bind("name ==[c] 'ann'").unwrap().candidates(&indexes), None);
    }
}
