//! Property-based test generators using proptest.
//!
//! Provides strategies for generating people, write operations and age
//! predicates over [`person_schema`](crate::fixtures::person_schema).

use crate::fixtures::person_values;
use cellar_core::{CoreResult, ObjectId, Value, WriteTransaction};
use proptest::prelude::*;

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,7}").expect("Invalid regex")
}

/// Strategy for generating ages, including negative ones.
pub fn age_strategy() -> impl Strategy<Value = i64> {
    -5i64..120
}

/// Strategy for generating primary keys from a small alphabet so that
/// collisions are likely.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-c]{1,2}").expect("Invalid regex")
}

/// One mutation against the `Person` collection.
#[derive(Debug, Clone)]
pub enum PersonOperation {
    /// Create a person.
    Create {
        /// Name.
        name: String,
        /// Age.
        age: i64,
    },
    /// Change the age of an existing person, picked by `slot`.
    SetAge {
        /// Index into the current objects, modulo their count.
        slot: usize,
        /// New age.
        age: i64,
    },
    /// Point one existing person at another.
    Befriend {
        /// Index of the person to change.
        slot: usize,
        /// Index of the friend.
        friend: usize,
    },
    /// Delete an existing person.
    Delete {
        /// Index into the current objects, modulo their count.
        slot: usize,
    },
}

/// Strategy for a single operation.
pub fn person_operation_strategy() -> impl Strategy<Value = PersonOperation> {
    prop_oneof![
        3 => (name_strategy(), age_strategy())
            .prop_map(|(name, age)| PersonOperation::Create { name, age }),
        2 => (any::<usize>(), age_strategy())
            .prop_map(|(slot, age)| PersonOperation::SetAge { slot, age }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(slot, friend)| PersonOperation::Befriend { slot, friend }),
        1 => any::<usize>().prop_map(|slot| PersonOperation::Delete { slot }),
    ]
}

/// Strategy for a sequence of up to `max` operations.
pub fn person_operations_strategy(max: usize) -> impl Strategy<Value = Vec<PersonOperation>> {
    prop::collection::vec(person_operation_strategy(), 0..max)
}

/// Applies `op` inside `txn`. Slot-based operations are skipped when the
/// collection is empty.
///
/// # Errors
///
/// Returns whatever the transaction returns.
pub fn apply_operation(txn: &mut WriteTransaction<'_>, op: &PersonOperation) -> CoreResult<()> {
    let people = txn.objects("Person")?.to_vec()?;
    let pick = |slot: usize| people.get(slot % people.len().max(1));
    match op {
        PersonOperation::Create { name, age } => {
            txn.create("Person", person_values(name, *age))?;
        }
        PersonOperation::SetAge { slot, age } => {
            if let Some(person) = pick(*slot) {
                txn.set(person, "age", *age)?;
            }
        }
        PersonOperation::Befriend { slot, friend } => {
            if let (Some(person), Some(friend)) = (pick(*slot), pick(*friend)) {
                txn.set(person, "best_friend", friend)?;
            }
        }
        PersonOperation::Delete { slot } => {
            if let Some(person) = pick(*slot) {
                txn.delete(person)?;
            }
        }
    }
    Ok(())
}

/// Strategy for `age` comparisons with an integer literal.
pub fn age_predicate_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["==", "!=", "<", "<=", ">", ">="]),
        age_strategy(),
    )
        .prop_map(|(op, age)| format!("age {op} {age}"))
}

/// Evaluates an `age` predicate produced by [`age_predicate_strategy`]
/// directly against a value, for comparison with query results.
pub fn age_predicate_holds(predicate: &str, age: i64) -> bool {
    let mut parts = predicate.split_whitespace().skip(1);
    let op = parts.next().unwrap_or_default();
    let literal: i64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or_default();
    match op {
        "==" => age == literal,
        "!=" => age != literal,
        "<" => age < literal,
        "<=" => age <= literal,
        ">" => age > literal,
        ">=" => age >= literal,
        _ => false,
    }
}

/// Reads every `Person` as `(id, values)` for whole-state comparisons.
///
/// # Errors
///
/// Returns whatever reading the results returns.
pub fn person_rows(results: &cellar_core::Results) -> CoreResult<Vec<(ObjectId, Vec<Value>)>> {
    results
        .iter()?
        .map(|person| Ok((person.id(), person.values()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_name_strategy() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let name = name_strategy().new_tree(&mut runner).unwrap().current();
            assert!(!name.is_empty());
            assert!(name.chars().next().unwrap().is_ascii_uppercase());
        }
    }

    #[test]
    fn test_age_predicate_strategy() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let predicate = age_predicate_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(predicate.starts_with("age "));
            assert!(cellar_core::parse(&predicate).is_ok());
        }
    }

    #[test]
    fn test_age_predicate_holds() {
        assert!(age_predicate_holds("age > 20", 23));
        assert!(!age_predicate_holds("age > 20", 18));
        assert!(age_predicate_holds("age <= -3", -3));
        assert!(age_predicate_holds("age != 4", 5));
    }
}
