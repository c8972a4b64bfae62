//! Test fixtures and database helpers.
//!
//! Provides demo schemas and convenience functions for setting up test
//! databases and common test scenarios.

use cellar_core::{
    Database, ObjectSchema, PropertyDescriptor, Results, SchemaDescriptor, Value,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `Person { name: string, age: int (indexed), best_friend: Person? }`.
pub fn person_schema() -> SchemaDescriptor {
    SchemaDescriptor::new().with_type(person_type())
}

/// [`person_schema`] plus
/// `Book { id: string (primary key), title: string, author: Person?, in_print: bool }`.
pub fn library_schema() -> SchemaDescriptor {
    SchemaDescriptor::new().with_type(person_type()).with_type(
        ObjectSchema::new("Book")
            .property(PropertyDescriptor::string("id").primary_key())
            .property(PropertyDescriptor::string("title"))
            .property(PropertyDescriptor::object("author", "Person"))
            .property(PropertyDescriptor::bool("in_print")),
    )
}

fn person_type() -> ObjectSchema {
    ObjectSchema::new("Person")
        .property(PropertyDescriptor::string("name"))
        .property(PropertyDescriptor::int("age").indexed())
        .property(PropertyDescriptor::object("best_friend", "Person"))
}

/// Values for a `Person` without a best friend.
pub fn person_values(name: &str, age: i64) -> Vec<Value> {
    vec![Value::from(name), Value::from(age), Value::Null]
}

/// Values for a `Book` without an author.
pub fn book_values(id: &str, title: &str) -> Vec<Value> {
    vec![Value::from(id), Value::from(title), Value::Null, Value::from(true)]
}

/// Collects the `name` property of every object in `results`.
pub fn names(results: &Results) -> Vec<String> {
    results
        .iter()
        .expect("results are readable")
        .map(|object| match object.get("name").expect("name is readable") {
            Value::String(name) => name,
            other => panic!("name is not a string: {other}"),
        })
        .collect()
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    schema: SchemaDescriptor,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory(schema: &SchemaDescriptor) -> Self {
        Self {
            db: Database::open_in_memory(schema).expect("Failed to open in-memory database"),
            schema: schema.clone(),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    pub fn file(schema: &SchemaDescriptor) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.cellar");
        let db = Database::open(&path, schema).expect("Failed to open file database");
        Self {
            db,
            schema: schema.clone(),
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes the handle and opens the same file again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases, whose contents do not survive close.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            schema,
            path,
            _temp_dir,
        } = self;
        let path = path.expect("Only file databases can be reopened");
        db.close().expect("Failed to close database");
        drop(db);
        let db = Database::open(&path, &schema).expect("Failed to reopen database");
        Self {
            db,
            schema,
            path: Some(path),
            _temp_dir,
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The schema the database was opened with.
    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(schema: &SchemaDescriptor, f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory(schema);
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(schema: &SchemaDescriptor, f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file(schema);
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// An in-memory [`person_schema`] database holding `people`, created in
    /// order in one transaction.
    pub fn people(people: &[(&str, i64)]) -> TestDatabase {
        let test_db = TestDatabase::memory(&person_schema());
        test_db
            .db
            .write(|txn| {
                for (name, age) in people {
                    txn.create("Person", person_values(name, *age))?;
                }
                Ok(())
            })
            .expect("Failed to create people");
        test_db
    }

    /// A file-backed [`library_schema`] database with `count` books, one
    /// commit per book.
    pub fn library(count: usize) -> TestDatabase {
        let test_db = TestDatabase::file(&library_schema());
        for i in 0..count {
            test_db
                .db
                .write(|txn| {
                    txn.create("Book", book_values(&format!("book-{i}"), &format!("Title {i}")))?;
                    Ok(())
                })
                .expect("Failed to create book");
        }
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory(&person_schema());
        assert!(test_db.path().is_none());
        assert!(test_db.objects("Person").unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_file_database_reopens() {
        let test_db = scenarios::library(3);
        let version = test_db.committed_version();
        let test_db = test_db.reopen();

        assert_eq!(test_db.committed_version(), version);
        assert_eq!(test_db.objects("Book").unwrap().len().unwrap(), 3);
    }

    #[test]
    fn test_people_scenario() {
        let test_db = scenarios::people(&[("Ann", 23), ("Ben", 18)]);
        assert_eq!(names(&test_db.objects("Person").unwrap()), vec!["Ann", "Ben"]);
    }

    #[test]
    fn test_with_file_db() {
        with_file_db(&person_schema(), |db, path| {
            assert!(path.exists());
            assert_eq!(db.path(), Some(path));
        });
    }
}
