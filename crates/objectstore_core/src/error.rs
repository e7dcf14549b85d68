//! Caller-facing error taxonomy.
//!
//! # Responsibility
//! - Give every fallible operation one error type with semantic variants.
//! - Keep engine-level failures (`DbError`) reachable through `source()`.
//!
//! # Invariants
//! - Aggregates enumerate every constituent failure; nothing is dropped.
//! - Background failures are shared (`SharedError`) so one outcome can be
//!   replayed to many subscribers.

use crate::db::DbError;
use crate::db::StoreDescription;
use crate::record::ObjectId;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure type carried by background result publishers.
pub type SharedError = Arc<Error>;

#[derive(Debug)]
pub enum Error {
    Db(DbError),
    /// Not every configured store reported before the deadline.
    LoadTimeout {
        timeout: Duration,
        reported: usize,
        expected: usize,
    },
    /// One or more stores reported an error while loading.
    LoadFailed(StoreLoadError),
    NoStoresLoaded,
    /// A record's origin store is no longer among the loaded stores.
    StoreUnavailable(Uuid),
    /// `find` matched no record with this identity.
    NotFound(Uuid),
    ObjectNotFound(ObjectId),
    UnknownEntity(String),
    UnknownProperty {
        entity: String,
        property: String,
    },
    TypeMismatch {
        entity: String,
        property: String,
        expected: &'static str,
        found: &'static str,
    },
    ImmutableProperty {
        entity: String,
        property: String,
    },
    Validation {
        entity: String,
        property: String,
        message: String,
    },
    DeleteDenied {
        entity: String,
        relationship: String,
    },
    SessionClosed,
    ReentrantPerform,
    WorkPanicked(String),
    /// Error raised by caller-supplied background work.
    Work(Box<dyn StdError + Send + Sync>),
    Spawn(std::io::Error),
    Pool(rayon::ThreadPoolBuildError),
}

impl Error {
    /// Wraps a caller error raised inside background work.
    pub fn work(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Work(err.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::LoadTimeout {
                timeout,
                reported,
                expected,
            } => write!(
                f,
                "timed out after {}ms waiting for stores to load ({reported}/{expected} reported)",
                timeout.as_millis()
            ),
            Self::LoadFailed(err) => write!(f, "{err}"),
            Self::NoStoresLoaded => write!(f, "no persistent stores are loaded"),
            Self::StoreUnavailable(id) => write!(f, "store {id} is no longer loaded"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "entity `{entity}` has no property `{property}`")
            }
            Self::TypeMismatch {
                entity,
                property,
                expected,
                found,
            } => write!(
                f,
                "`{entity}.{property}` expects {expected}, got {found}"
            ),
            Self::ImmutableProperty { entity, property } => {
                write!(f, "`{entity}.{property}` is managed and cannot be reassigned")
            }
            Self::Validation {
                entity,
                property,
                message,
            } => write!(f, "validation failed for `{entity}.{property}`: {message}"),
            Self::DeleteDenied {
                entity,
                relationship,
            } => write!(
                f,
                "delete of `{entity}` denied: relationship `{relationship}` is not empty"
            ),
            Self::SessionClosed => write!(f, "session worker is no longer running"),
            Self::ReentrantPerform => {
                write!(f, "perform_and_wait called from the session's own worker")
            }
            Self::WorkPanicked(message) => write!(f, "background work panicked: {message}"),
            Self::Work(err) => write!(f, "{err}"),
            Self::Spawn(err) => write!(f, "failed to spawn worker thread: {err}"),
            Self::Pool(err) => write!(f, "failed to build finishing pool: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::LoadFailed(err) => Some(err),
            Self::Work(err) => Some(err.as_ref()),
            Self::Spawn(err) => Some(err),
            Self::Pool(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for Error {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

impl From<StoreLoadError> for Error {
    fn from(value: StoreLoadError) -> Self {
        Self::LoadFailed(value)
    }
}

/// One store that failed to load.
#[derive(Debug)]
pub struct StoreLoadFailure {
    pub description: StoreDescription,
    pub error: DbError,
}

/// Aggregate of every store that reported an error during one load.
#[derive(Debug)]
pub struct StoreLoadError {
    pub failures: Vec<StoreLoadFailure>,
}

impl Display for StoreLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} store(s) failed to load", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.description, failure.error)?;
        }
        Ok(())
    }
}

impl StdError for StoreLoadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures
            .first()
            .map(|failure| &failure.error as &(dyn StdError + 'static))
    }
}
