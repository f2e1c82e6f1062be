//! # Snapshot Persistence Tests
//!
//! Save/load round-trips through the engine: documents survive
//! verbatim, indexes are rebuilt from the document scan, sealing and
//! backup rotation behave.

use std::path::Path;
use std::time::Duration;

use kagura_core::config::{DatabaseConfig, SnapshotConfig};
use kagura_core::value::Value;
use kagura_index::{IndexKind, IndexOptions};
use kagura_query::QueryOptions;
use kagura_storage::{Database, FieldType, Schema};

fn obj(pairs: Vec<(&str, Value)>) -> Value {
    Value::object(pairs)
}

fn config(dir: &Path, passphrase: Option<&str>) -> DatabaseConfig {
    DatabaseConfig {
        snapshot: SnapshotConfig {
            path: Some(dir.join("store.kagura")),
            passphrase: passphrase.map(String::from),
            max_backups: 2,
            save_interval: Duration::from_secs(60),
        },
        ..DatabaseConfig::default()
    }
}

fn populate(db: &Database) {
    let schema = Schema::default().field("name", FieldType::String, true);
    db.create_collection("people", Some(schema)).unwrap();
    db.create_index("people", "name", IndexOptions::equality()).unwrap();
    db.create_index("people", "age", IndexOptions::ordered()).unwrap();
    for (name, age) in [("ayame", 31), ("botan", 24), ("chiyo", 40)] {
        db.insert(
            "people",
            obj(vec![("name", Value::from(name)), ("age", Value::Int(age))]),
        )
        .unwrap();
    }
}

#[test]
fn save_and_reopen_rebuilds_indexes() {
    let dir = tempfile::tempdir().unwrap();

    let original_id = {
        let db = Database::new(config(dir.path(), None));
        populate(&db);
        db.save().unwrap();
        db.find_one("people", &obj(vec![("name", Value::from("botan"))]))
            .unwrap()
            .unwrap()
            .id
    };

    let db = Database::open(config(dir.path(), None)).unwrap();
    db.check_invariants().unwrap();

    // Documents came back verbatim, ids included.
    assert_eq!(db.count("people", &obj(vec![])).unwrap(), 3);
    let botan = db
        .find_one("people", &obj(vec![("name", Value::from("botan"))]))
        .unwrap()
        .unwrap();
    assert_eq!(botan.id, original_id);

    // Index definitions survived and their state was rebuilt from the
    // document scan.
    let indexes = db.list_indexes("people").unwrap();
    assert_eq!(indexes.len(), 2);
    assert!(indexes.iter().any(|d| d.field == "name" && d.kind == IndexKind::Equality));
    let in_range = db
        .find(
            "people",
            &obj(vec![("age", obj(vec![("gte", Value::Int(25))]))]),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(in_range.len(), 2);

    // The restored schema still validates.
    assert!(db.insert("people", obj(vec![("age", Value::Int(1))])).is_err());
    assert!(db.stats().memory_usage > 0);
}

#[test]
fn sealed_snapshot_requires_the_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::new(config(dir.path(), Some("secret")));
        populate(&db);
        db.save().unwrap();
    }

    let db = Database::open(config(dir.path(), Some("secret"))).unwrap();
    assert_eq!(db.count("people", &obj(vec![])).unwrap(), 3);

    let err = Database::open(config(dir.path(), Some("wrong"))).unwrap_err();
    assert_eq!(err.error_code(), "CORRUPTION");

    let err = Database::open(config(dir.path(), None)).unwrap_err();
    assert_eq!(err.error_code(), "SNAPSHOT_ERROR");
}

#[test]
fn opening_without_a_blob_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(config(dir.path(), None)).unwrap();
    assert!(!db.has_collection("people"));
}

#[test]
fn repeated_saves_rotate_backups() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(config(dir.path(), None));
    populate(&db);
    for _ in 0..4 {
        db.save().unwrap();
    }
    let base = dir.path().join("store.kagura");
    assert!(base.exists());
    assert!(dir.path().join("store.kagura.1").exists());
    assert!(dir.path().join("store.kagura.2").exists());
    assert!(!dir.path().join("store.kagura.3").exists());
}

#[test]
fn mutations_after_reload_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::new(config(dir.path(), None));
        populate(&db);
        db.save().unwrap();
    }

    let db = Database::open(config(dir.path(), None)).unwrap();
    db.insert(
        "people",
        obj(vec![("name", Value::from("daiki")), ("age", Value::Int(28))]),
    )
    .unwrap();
    db.update(
        "people",
        &obj(vec![("name", Value::from("ayame"))]),
        &obj(vec![("age", Value::Int(32))]),
    )
    .unwrap();
    db.delete("people", &obj(vec![("name", Value::from("chiyo"))]))
        .unwrap();

    assert_eq!(db.count("people", &obj(vec![])).unwrap(), 3);
    let in_range = db
        .find(
            "people",
            &obj(vec![("age", obj(vec![("gte", Value::Int(28))]))]),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(in_range.len(), 2);
    db.check_invariants().unwrap();

    // And the mutated state survives another full cycle.
    db.save().unwrap();
    let db = Database::open(config(dir.path(), None)).unwrap();
    assert_eq!(db.count("people", &obj(vec![])).unwrap(), 3);
}
