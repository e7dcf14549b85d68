use objectstore_core::db::migrations::latest_version;
use objectstore_core::db::{open_db, open_db_in_memory, DbError, SqliteStore};
use objectstore_core::{AttributeType, ModelBuilder, StoreDescription};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_schema_object_exists(&conn, "table", "records");
    assert_schema_object_exists(&conn, "table", "store_metadata");
    assert_schema_object_exists(&conn, "index", "records_entity");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.sqlite");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_schema_object_exists(&conn_second, "table", "records");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_open_derives_entity_indexes_from_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("indexed.sqlite");

    let mut builder = ModelBuilder::new("Contacts");
    builder.describe("Contact", |entity| {
        entity.add_attribute("email", AttributeType::String);
        entity.index(&["email"]);
        entity.unique(&["email"]);
    });
    let model = Arc::new(builder.build());

    let store = SqliteStore::open(
        &StoreDescription::sqlite(&path),
        model,
        Duration::from_secs(1),
    )
    .unwrap();
    drop(store);

    let conn = Connection::open(&path).unwrap();
    assert_schema_object_exists(&conn, "index", "Contact_index_local_id");
    assert_schema_object_exists(&conn, "index", "Contact_unique_local_id");
    assert_schema_object_exists(&conn, "index", "Contact_index_email");
    assert_schema_object_exists(&conn, "index", "Contact_unique_email");
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_schema_object_exists(conn: &Connection, kind: &str, name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "{kind} {name} does not exist");
}
