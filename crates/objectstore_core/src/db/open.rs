//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Translate store description options into connection settings.
//! - Trigger engine migrations before returning a usable connection.
//!
//! # Invariants
//! - The busy timeout is installed before the first statement runs.
//! - Returned connections have migrations fully applied.
//! - Unknown store options are rejected, never ignored.

use super::description::{
    StoreDescription, StoreKind, OPTION_BUSY_TIMEOUT_MS, OPTION_JOURNAL_MODE, OPTION_READ_ONLY,
};
use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{debug, error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const JOURNAL_MODES: &[&str] = &["delete", "truncate", "persist", "memory", "wal", "off"];

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with(Target::File(path.as_ref()), &ConnectionOptions::default())
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with(Target::Memory, &ConnectionOptions::default())
}

/// Opens the connection described by one store description.
///
/// `default_busy_timeout` applies unless the description overrides it with
/// the `busy_timeout_ms` option.
pub(crate) fn open_for_description(
    description: &StoreDescription,
    default_busy_timeout: Duration,
) -> DbResult<Connection> {
    let options = ConnectionOptions::from_description(description, default_busy_timeout)?;
    let target = match description.kind {
        StoreKind::InMemory => Target::Memory,
        StoreKind::Sqlite => Target::File(description.location().ok_or(DbError::MissingLocation)?),
    };
    open_with(target, &options)
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    File(&'a Path),
    Memory,
}

impl Target<'_> {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionOptions {
    read_only: bool,
    journal_mode: Option<&'static str>,
    busy_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            journal_mode: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl ConnectionOptions {
    fn from_description(
        description: &StoreDescription,
        default_busy_timeout: Duration,
    ) -> DbResult<Self> {
        let mut options = Self {
            busy_timeout: default_busy_timeout,
            ..Self::default()
        };
        for (key, value) in &description.options {
            let unsupported = || DbError::UnsupportedOption {
                option: key.clone(),
                value: value.clone(),
            };
            match key.as_str() {
                OPTION_READ_ONLY => {
                    options.read_only = match value.trim().to_ascii_lowercase().as_str() {
                        "true" | "1" | "yes" => true,
                        "false" | "0" | "no" => false,
                        _ => return Err(unsupported()),
                    };
                }
                OPTION_JOURNAL_MODE => {
                    let normalized = value.trim().to_ascii_lowercase();
                    let mode = JOURNAL_MODES
                        .iter()
                        .find(|mode| **mode == normalized)
                        .ok_or_else(unsupported)?;
                    options.journal_mode = Some(*mode);
                }
                OPTION_BUSY_TIMEOUT_MS => {
                    let millis = value.trim().parse::<u64>().map_err(|_| unsupported())?;
                    options.busy_timeout = Duration::from_millis(millis);
                }
                _ => return Err(unsupported()),
            }
        }
        Ok(options)
    }

    fn flags(&self) -> OpenFlags {
        if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        }
    }
}

fn open_with(target: Target<'_>, options: &ConnectionOptions) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    // In-memory databases start empty, so `read_only` has nothing to protect.
    let opened = match target {
        Target::File(path) => Connection::open_with_flags(path, options.flags()),
        Target::Memory => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} read_only={} duration_ms={}",
                options.read_only,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, options: &ConnectionOptions) -> DbResult<()> {
    conn.busy_timeout(options.busy_timeout)?;
    if let Some(mode) = options.journal_mode {
        let applied: String =
            conn.query_row(&format!("PRAGMA journal_mode = {mode};"), [], |row| row.get(0))?;
        debug!("event=db_journal_mode module=db status=ok requested={mode} applied={applied}");
    }
    apply_migrations(conn)?;
    Ok(())
}
