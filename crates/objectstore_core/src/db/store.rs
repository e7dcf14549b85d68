//! One loaded SQLite store.
//!
//! # Responsibility
//! - Bind a bootstrapped connection to the model it serves.
//! - Materialize entity indexes and uniqueness groups as partial
//!   expression indexes over the JSON row body.
//! - Read rows per entity and apply one save's changes atomically.
//!
//! # Invariants
//! - A store file belongs to exactly one model name; reopening it with
//!   another model fails with `ModelMismatch`.
//! - Store identity (`store_uuid`) is stable across reopen.
//! - `apply` commits every change or none.

use super::codec::{decode_body, encode_body};
use super::description::StoreDescription;
use super::open::open_for_description;
use super::{DbError, DbResult};
use crate::schema::{EntityDescription, EntityId, Model, PropertyDescription, LOCAL_ID};
use crate::value::Value;
use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const META_MODEL_NAME: &str = "model_name";
const META_STORE_UUID: &str = "store_uuid";

/// One persisted row decoded against the model.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: Uuid,
    pub values: BTreeMap<String, Value>,
}

/// One row mutation inside a save.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert {
        entity: EntityId,
        key: Uuid,
        values: BTreeMap<String, Value>,
    },
    Update {
        entity: EntityId,
        key: Uuid,
        values: BTreeMap<String, Value>,
    },
    Delete {
        key: Uuid,
    },
}

pub struct SqliteStore {
    identifier: Uuid,
    description: StoreDescription,
    model: Arc<Model>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("identifier", &self.identifier)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens the store behind `description` and prepares it for `model`.
    ///
    /// # Errors
    /// - Connection, option and migration failures from the bootstrap.
    /// - `ModelMismatch` when the file was created for another model.
    /// - `InvalidIdentifier`, `UnknownProperty` or `UnindexableProperty`
    ///   when an index or uniqueness group cannot be expressed.
    /// - `ConstraintViolation` when existing rows break a uniqueness group.
    pub fn open(
        description: &StoreDescription,
        model: Arc<Model>,
        busy_timeout: Duration,
    ) -> DbResult<Self> {
        let started_at = Instant::now();
        let conn = open_for_description(description, busy_timeout)?;
        let writable = !conn.is_readonly(DatabaseName::Main)?;
        let identifier = ensure_metadata(&conn, model.name(), writable)?;
        for entity in model.entities() {
            ensure_entity_indexes(&conn, entity, writable)?;
        }
        info!(
            "event=store_open module=db status=ok store={} store_uuid={} entities={} duration_ms={}",
            description,
            identifier,
            model.entities().len(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            identifier,
            description: description.clone(),
            model,
            conn: Mutex::new(conn),
        })
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    pub fn description(&self) -> &StoreDescription {
        &self.description
    }

    /// Returns every row of `entity` in insertion order.
    pub fn fetch_rows(&self, entity: &EntityDescription) -> DbResult<Vec<StoredRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT object_key, body FROM records WHERE entity = ?1 ORDER BY rowid;",
        )?;
        let raw = stmt
            .query_map(params![entity.name()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        raw.into_iter()
            .map(|(key, body)| decode_row(entity, &key, &body))
            .collect()
    }

    /// Rows of `entity` whose `local_id` equals `local_id`.
    ///
    /// The entity name is inlined so SQLite can match the partial
    /// `{Entity}_index_local_id` index.
    pub fn fetch_by_local_id(
        &self,
        entity: &EntityDescription,
        local_id: Uuid,
    ) -> DbResult<Vec<StoredRow>> {
        validate_identifier(entity.name())?;
        let sql = format!(
            "SELECT object_key, body FROM records WHERE entity = '{}' AND json_extract(body, '$.{LOCAL_ID}') = ?1 ORDER BY rowid;",
            entity.name()
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params![local_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        raw.into_iter()
            .map(|(key, body)| decode_row(entity, &key, &body))
            .collect()
    }

    pub fn fetch_row(&self, entity: &EntityDescription, key: Uuid) -> DbResult<Option<StoredRow>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE object_key = ?1 AND entity = ?2;",
                params![key.to_string(), entity.name()],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        body.map(|body| decode_row(entity, &key.to_string(), &body))
            .transpose()
    }

    /// Applies `changes` inside one transaction.
    pub fn apply(&self, changes: &[RowChange]) -> DbResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let started_at = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for change in changes {
            match change {
                RowChange::Insert {
                    entity,
                    key,
                    values,
                } => {
                    let entity = self.model.entity(*entity);
                    let body = encode_body(entity, values)?;
                    tx.execute(
                        "INSERT INTO records (object_key, entity, body) VALUES (?1, ?2, ?3);",
                        params![key.to_string(), entity.name(), body],
                    )?;
                }
                RowChange::Update {
                    entity,
                    key,
                    values,
                } => {
                    let body = encode_body(self.model.entity(*entity), values)?;
                    let updated = tx.execute(
                        "UPDATE records SET body = ?1 WHERE object_key = ?2;",
                        params![body, key.to_string()],
                    )?;
                    if updated == 0 {
                        return Err(DbError::MissingRow(*key));
                    }
                }
                RowChange::Delete { key } => {
                    tx.execute(
                        "DELETE FROM records WHERE object_key = ?1;",
                        params![key.to_string()],
                    )?;
                }
            }
        }
        tx.commit()?;
        debug!(
            "event=store_apply module=db status=ok store_uuid={} changes={} duration_ms={}",
            self.identifier,
            changes.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn decode_row(entity: &EntityDescription, key: &str, body: &str) -> DbResult<StoredRow> {
    let key = Uuid::parse_str(key)
        .map_err(|err| DbError::InvalidData(format!("object key `{key}`: {err}")))?;
    Ok(StoredRow {
        key,
        values: decode_body(entity, body)?,
    })
}

fn ensure_metadata(conn: &Connection, model_name: &str, writable: bool) -> DbResult<Uuid> {
    match read_metadata(conn, META_MODEL_NAME)? {
        Some(found) if found != model_name => {
            return Err(DbError::ModelMismatch {
                expected: model_name.to_string(),
                found,
            });
        }
        Some(_) => {}
        None if writable => write_metadata(conn, META_MODEL_NAME, model_name)?,
        None => {}
    }

    if let Some(identifier) = read_metadata(conn, META_STORE_UUID)?
        .and_then(|text| Uuid::parse_str(&text).ok())
    {
        return Ok(identifier);
    }
    let identifier = Uuid::new_v4();
    if writable {
        write_metadata(conn, META_STORE_UUID, &identifier.to_string())?;
    }
    Ok(identifier)
}

fn read_metadata(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = ?1;",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn write_metadata(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_metadata (key, value) VALUES (?1, ?2);",
        params![key, value],
    )?;
    Ok(())
}

fn ensure_entity_indexes(
    conn: &Connection,
    entity: &EntityDescription,
    writable: bool,
) -> DbResult<()> {
    validate_identifier(entity.name())?;

    let mut statements = Vec::new();
    for index in entity.indexes() {
        validate_identifier(&index.name)?;
        let columns = index_columns(
            entity,
            index
                .elements
                .iter()
                .map(|element| element.property.as_str()),
        )?;
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON records ({columns}) WHERE entity = '{}';",
            index.name,
            entity.name()
        ));
    }
    for group in entity.uniqueness_constraints() {
        let columns = index_columns(entity, group.iter().map(String::as_str))?;
        statements.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{}_unique_{}\" ON records ({columns}) WHERE entity = '{}';",
            entity.name(),
            group.join("_"),
            entity.name()
        ));
    }

    if writable {
        for statement in &statements {
            conn.execute_batch(statement)?;
        }
    }
    Ok(())
}

fn index_columns<'a>(
    entity: &EntityDescription,
    properties: impl Iterator<Item = &'a str>,
) -> DbResult<String> {
    let columns = properties
        .map(|property| {
            validate_identifier(property)?;
            match entity.property(property) {
                None => Err(DbError::UnknownProperty {
                    entity: entity.name().to_string(),
                    property: property.to_string(),
                }),
                Some(PropertyDescription::Relationship(relationship))
                    if relationship.is_to_many() =>
                {
                    Err(DbError::UnindexableProperty {
                        entity: entity.name().to_string(),
                        property: property.to_string(),
                    })
                }
                Some(_) => Ok(format!("json_extract(body, '$.{property}')")),
            }
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(columns.join(", "))
}

fn validate_identifier(name: &str) -> DbResult<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{RowChange, SqliteStore};
    use crate::db::{DbError, StoreDescription};
    use crate::schema::{AttributeType, Model, ModelBuilder, LOCAL_ID};
    use crate::value::Value;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn account_model(name: &str) -> Arc<Model> {
        let mut builder = ModelBuilder::new(name);
        builder.describe("Account", |entity| {
            entity.add_attribute("email", AttributeType::String);
            entity.unique(&["email"]);
        });
        Arc::new(builder.build())
    }

    fn insert(model: &Model, email: &str) -> RowChange {
        let entity = model.entity_named("Account").expect("Account");
        RowChange::Insert {
            entity: entity.id(),
            key: Uuid::new_v4(),
            values: BTreeMap::from([("email".to_string(), Value::from(email))]),
        }
    }

    #[test]
    fn uniqueness_group_rejects_duplicates_atomically() {
        let model = account_model("Accounts");
        let store = SqliteStore::open(
            &StoreDescription::in_memory(),
            model.clone(),
            Duration::from_secs(1),
        )
        .expect("open");

        store
            .apply(&[insert(&model, "a@example.com")])
            .expect("first insert");
        let error = store
            .apply(&[
                insert(&model, "b@example.com"),
                insert(&model, "a@example.com"),
            ])
            .expect_err("duplicate email must fail");
        assert!(matches!(error, DbError::ConstraintViolation(_)));

        let entity = model.entity_named("Account").expect("Account");
        let rows = store.fetch_rows(entity).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["email"], Value::from("a@example.com"));
    }

    #[test]
    fn local_id_lookup_uses_the_expression_index() {
        let model = account_model("Accounts");
        let store = SqliteStore::open(
            &StoreDescription::in_memory(),
            model.clone(),
            Duration::from_secs(1),
        )
        .expect("open");
        let entity = model.entity_named("Account").expect("Account");

        let wanted = Uuid::new_v4();
        let mut changes = Vec::new();
        for (local_id, email) in [(Uuid::new_v4(), "a@example.com"), (wanted, "b@example.com")] {
            changes.push(RowChange::Insert {
                entity: entity.id(),
                key: Uuid::new_v4(),
                values: BTreeMap::from([
                    (LOCAL_ID.to_string(), Value::Uuid(local_id)),
                    ("email".to_string(), Value::from(email)),
                ]),
            });
        }
        store.apply(&changes).expect("insert");

        let rows = store.fetch_by_local_id(entity, wanted).expect("lookup");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["email"], Value::from("b@example.com"));
        assert!(store
            .fetch_by_local_id(entity, Uuid::new_v4())
            .expect("lookup")
            .is_empty());

        let conn = store.conn.lock();
        let plan: Vec<String> = conn
            .prepare(&format!(
                "EXPLAIN QUERY PLAN SELECT object_key, body FROM records WHERE entity = 'Account' AND json_extract(body, '$.{LOCAL_ID}') = ?1 ORDER BY rowid;"
            ))
            .expect("prepare")
            .query_map([wanted.to_string()], |row| row.get::<_, String>(3))
            .expect("plan")
            .collect::<Result<_, _>>()
            .expect("plan rows");
        assert!(
            plan.iter().any(|detail| detail.contains("_local_id")),
            "plan: {plan:?}"
        );
    }

    #[test]
    fn reopen_keeps_identity_and_rejects_other_models() {
        let dir = tempfile::tempdir().expect("tempdir");
        let description = StoreDescription::sqlite(dir.path().join("accounts.sqlite"));

        let first = SqliteStore::open(&description, account_model("Accounts"), Duration::from_secs(1))
            .expect("open")
            .identifier();
        let second = SqliteStore::open(&description, account_model("Accounts"), Duration::from_secs(1))
            .expect("reopen")
            .identifier();
        assert_eq!(first, second);

        let error = SqliteStore::open(&description, account_model("Ledger"), Duration::from_secs(1))
            .expect_err("different model must fail");
        assert!(matches!(
            error,
            DbError::ModelMismatch { expected, found } if expected == "Ledger" && found == "Accounts"
        ));
    }

    #[test]
    fn unknown_and_to_many_index_members_are_rejected() {
        let mut builder = ModelBuilder::new("Broken");
        builder.describe("Account", |entity| {
            entity.unique(&["nickname"]);
        });
        let error = SqliteStore::open(
            &StoreDescription::in_memory(),
            Arc::new(builder.build()),
            Duration::from_secs(1),
        )
        .expect_err("unknown unique member must fail");
        assert!(matches!(error, DbError::UnknownProperty { property, .. } if property == "nickname"));

        let mut builder = ModelBuilder::new("Broken");
        let team = builder.describe("Team", |_| {});
        builder.describe("Player", |entity| {
            entity.belongs_to(team, "team", "players");
        });
        builder.entity(team).index(&["players"]);
        let error = SqliteStore::open(
            &StoreDescription::in_memory(),
            Arc::new(builder.build()),
            Duration::from_secs(1),
        )
        .expect_err("to-many index must fail");
        assert!(matches!(error, DbError::UnindexableProperty { property, .. } if property == "players"));
    }

    #[test]
    fn update_of_vanished_row_is_reported() {
        let model = account_model("Accounts");
        let store = SqliteStore::open(&StoreDescription::in_memory(), model.clone(), Duration::from_secs(1))
            .expect("open");
        let entity = model.entity_named("Account").expect("Account");
        let key = Uuid::new_v4();
        let error = store
            .apply(&[RowChange::Update {
                entity: entity.id(),
                key,
                values: BTreeMap::new(),
            }])
            .expect_err("missing row");
        assert!(matches!(error, DbError::MissingRow(missing) if missing == key));
    }
}
