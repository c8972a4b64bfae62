//! End-to-end scenarios against file-backed databases.

use cellar_core::{
    CoreError, Database, ErrorKind, ObjectSchema, SchemaDescriptor, TransactionState, Value,
};
use cellar_testkit::prelude::*;

fn person_with_optional_age() -> SchemaDescriptor {
    SchemaDescriptor::new().with_type(
        ObjectSchema::from_shorthand("Person", &[("name", "string"), ("age", "int?")]).unwrap(),
    )
}

fn book_schema() -> SchemaDescriptor {
    SchemaDescriptor::new().with_type(
        ObjectSchema::from_shorthand(
            "Book",
            &[("id", "string"), ("title", "string"), ("price", "int")],
        )
        .unwrap()
        .primary_key("id")
        .index("title"),
    )
}

#[test]
fn filtered_people_over_twenty() {
    with_file_db(&person_with_optional_age(), |db, _| {
        db.write(|txn| {
            for (name, age) in [("Ann", 23), ("Ben", 18), ("Cat", 33)] {
                txn.create("Person", vec![name.into(), age.into()])?;
            }
            txn.create("Person", vec!["Dan".into(), Value::Null])?;
            Ok(())
        })
        .unwrap();

        let over_twenty = db.objects("Person").unwrap().filtered("age > 20").unwrap();
        assert_eq!(names(&over_twenty), vec!["Ann", "Cat"]);
        // Stable across evaluations.
        assert_eq!(names(&over_twenty), vec!["Ann", "Cat"]);

        let unknown = db.objects("Person").unwrap().filtered("age == nil").unwrap();
        assert_eq!(names(&unknown), vec!["Dan"]);
    });
}

#[test]
fn duplicate_book_ids_commit_nothing() {
    let test_db = TestDatabase::file(&book_schema());
    let version = test_db.committed_version();

    let result = test_db.write(|txn| {
        txn.create("Book", vec!["isbn-1".into(), "Dune".into(), 10.into()])?;
        txn.create("Book", vec!["isbn-1".into(), "Emma".into(), 12.into()])?;
        Ok(())
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    assert_eq!(test_db.committed_version(), version);
    assert!(test_db.objects("Book").unwrap().is_empty().unwrap());
    assert_eq!(test_db.transaction_state(), TransactionState::Idle);

    let test_db = test_db.reopen();
    assert!(test_db.objects("Book").unwrap().is_empty().unwrap());
}

#[test]
fn duplicate_across_transactions_is_rejected() {
    let test_db = TestDatabase::file(&book_schema());
    test_db
        .write(|txn| {
            txn.create("Book", vec!["isbn-1".into(), "Dune".into(), 10.into()])?;
            Ok(())
        })
        .unwrap();

    let mut txn = test_db.begin_transaction().unwrap();
    let err = txn
        .create("Book", vec!["isbn-1".into(), "Dune II".into(), 11.into()])
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }));
    assert_eq!(txn.state(), TransactionState::Cancelled);
    drop(txn);

    let books = test_db.objects("Book").unwrap();
    assert_eq!(books.len().unwrap(), 1);
    assert_eq!(
        books.first().unwrap().unwrap().get("title").unwrap(),
        Value::from("Dune")
    );
}

#[test]
fn delete_frees_primary_key_for_reuse() {
    let test_db = TestDatabase::file(&book_schema());
    test_db
        .write(|txn| {
            let book = txn.create("Book", vec!["isbn-1".into(), "Dune".into(), 10.into()])?;
            txn.delete(&book)?;
            txn.create("Book", vec!["isbn-1".into(), "Dune".into(), 12.into()])?;
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    let book = test_db
        .object_for_primary_key("Book", "isbn-1")
        .unwrap()
        .unwrap();
    assert_eq!(book.get("price").unwrap(), Value::Int(12));
}

#[test]
fn string_queries_use_indexes_and_operators() {
    let test_db = TestDatabase::file(&book_schema());
    test_db
        .write(|txn| {
            for (id, title, price) in [
                ("b1", "Dune", 10),
                ("b2", "Dune Messiah", 12),
                ("b3", "Emma", 8),
                ("b4", "dune (annotated)", 30),
            ] {
                txn.create("Book", vec![id.into(), title.into(), price.into()])?;
            }
            Ok(())
        })
        .unwrap();

    let books = test_db.objects("Book").unwrap();
    let ids = |predicate: &str| -> Vec<String> {
        books
            .filtered(predicate)
            .unwrap()
            .iter()
            .unwrap()
            .map(|book| book.get("id").unwrap().as_str().unwrap().to_string())
            .collect()
    };

    assert_eq!(ids("title BEGINSWITH 'Dune'"), vec!["b1", "b2"]);
    assert_eq!(ids("title BEGINSWITH[c] 'dune'"), vec!["b1", "b2", "b4"]);
    assert_eq!(ids("title CONTAINS 'ss'"), vec!["b2"]);
    assert_eq!(ids("title ENDSWITH 'a'"), vec!["b3"]);
    assert_eq!(ids("price >= 10 AND price < 30"), vec!["b1", "b2"]);
    assert_eq!(ids("title == 'Emma' && price == 8"), vec!["b3"]);
    assert!(ids("title == 'Missing'").is_empty());

    let err = books.filtered("price CONTAINS 'x'").unwrap_err();
    assert!(matches!(err, CoreError::InvalidQuery { .. }));
    let err = books.filtered("pages > 3").unwrap_err();
    assert!(matches!(err, CoreError::InvalidQuery { .. }));
}

#[test]
fn readers_keep_their_snapshot_while_writer_commits() {
    let test_db = TestDatabase::file(&person_schema());
    test_db
        .write(|txn| {
            txn.create("Person", person_values("Ann", 23))?;
            Ok(())
        })
        .unwrap();

    let db: &Database = &test_db;
    let snapshot = db.objects("Person").unwrap();
    let ann = snapshot.first().unwrap().unwrap();

    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                db.write(|txn| {
                    let ann = txn.objects("Person")?.first()?;
                    if let Some(ann) = ann {
                        txn.set(&ann, "age", 24)?;
                    }
                    txn.create("Person", person_values("Ben", 18))
                        .map(|_| ())
                })
                .unwrap();
            })
            .join()
            .unwrap();
    });

    assert_eq!(ann.get("age").unwrap(), Value::Int(23));
    assert_eq!(snapshot.len().unwrap(), 1);

    let latest = db.objects("Person").unwrap();
    assert_eq!(latest.len().unwrap(), 2);
    assert_eq!(
        latest.first().unwrap().unwrap().get("age").unwrap(),
        Value::Int(24)
    );
}

#[test]
fn closed_handle_rejects_everything() {
    let test_db = TestDatabase::file(&person_schema());
    let people = test_db.objects("Person").unwrap();
    test_db.close().unwrap();

    assert_eq!(
        test_db.objects("Person").unwrap_err().kind(),
        ErrorKind::ClosedHandle
    );
    assert_eq!(test_db.stats().unwrap_err().kind(), ErrorKind::ClosedHandle);
    assert_eq!(test_db.flush().unwrap_err().kind(), ErrorKind::ClosedHandle);
    assert_eq!(people.len().unwrap_err().kind(), ErrorKind::StaleAccessor);
}

#[test]
fn references_survive_reopen() {
    let test_db = TestDatabase::file(&library_schema());
    test_db
        .write(|txn| {
            let author = txn.create("Person", person_values("Frank", 60))?;
            let book = txn.create("Book", book_values("b1", "Dune"))?;
            txn.set(&book, "author", &author)
        })
        .unwrap();

    let test_db = test_db.reopen();
    let book = test_db.object_for_primary_key("Book", "b1").unwrap().unwrap();
    let author = book.get_ref("author").unwrap().unwrap();
    assert_eq!(author.get("name").unwrap(), Value::from("Frank"));
    assert_eq!(author.type_name(), "Person");

    let by_author = test_db
        .objects("Book")
        .unwrap()
        .filtered("author != nil")
        .unwrap();
    assert_eq!(by_author.len().unwrap(), 1);
}
