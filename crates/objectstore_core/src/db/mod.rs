//! SQLite storage engine behind the store manager.
//!
//! # Responsibility
//! - Open and configure one SQLite connection per store description.
//! - Apply engine migrations in deterministic order.
//! - Persist records as JSON rows and materialize schema indexes.
//!
//! # Invariants
//! - Engine schema version is tracked via `PRAGMA user_version`.
//! - A store is never handed out before migrations and model checks succeed.
//! - Identifiers interpolated into DDL are validated first.

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

mod codec;
mod description;
pub mod migrations;
mod open;
mod store;

pub use description::{
    StoreDescription, StoreKind, OPTION_BUSY_TIMEOUT_MS, OPTION_JOURNAL_MODE, OPTION_READ_ONLY,
};
pub use open::{open_db, open_db_in_memory};
pub(crate) use open::open_for_description;
pub use store::{RowChange, SqliteStore, StoredRow};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Store was created for a different model.
    ModelMismatch {
        expected: String,
        found: String,
    },
    /// Name that cannot be used as an SQL identifier.
    InvalidIdentifier(String),
    UnknownProperty {
        entity: String,
        property: String,
    },
    /// To-many relationships have no stored column to index.
    UnindexableProperty {
        entity: String,
        property: String,
    },
    UnsupportedOption {
        option: String,
        value: String,
    },
    MissingLocation,
    ConstraintViolation(String),
    /// Stored row body does not decode against the model.
    InvalidData(String),
    /// Update targeted a row that no longer exists.
    MissingRow(Uuid),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::ModelMismatch { expected, found } => write!(
                f,
                "store belongs to model `{found}`, expected `{expected}`"
            ),
            Self::InvalidIdentifier(name) => write!(f, "invalid identifier `{name}`"),
            Self::UnknownProperty { entity, property } => write!(
                f,
                "index on `{entity}` references unknown property `{property}`"
            ),
            Self::UnindexableProperty { entity, property } => write!(
                f,
                "`{entity}.{property}` is a to-many relationship and cannot be indexed"
            ),
            Self::UnsupportedOption { option, value } => {
                write!(f, "unsupported store option `{option}={value}`")
            }
            Self::MissingLocation => write!(f, "sqlite store requires a location"),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::MissingRow(key) => write!(f, "stored row {key} no longer exists"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                )
            }
            _ => Self::Sqlite(value),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}
