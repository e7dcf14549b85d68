//! Physical store location descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const OPTION_READ_ONLY: &str = "read_only";
pub const OPTION_JOURNAL_MODE: &str = "journal_mode";
pub const OPTION_BUSY_TIMEOUT_MS: &str = "busy_timeout_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// SQLite database file at `location`.
    Sqlite,
    /// Private in-memory SQLite database, discarded with the store.
    InMemory,
}

/// One physical store the manager opens when loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescription {
    pub kind: StoreKind,
    #[serde(default)]
    pub location: Option<PathBuf>,
    /// Engine-specific options; validated by the engine at load time.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl StoreDescription {
    pub fn in_memory() -> Self {
        Self {
            kind: StoreKind::InMemory,
            location: None,
            options: BTreeMap::new(),
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: StoreKind::Sqlite,
            location: Some(path.into()),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl Display for StoreDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.kind, &self.location) {
            (StoreKind::Sqlite, Some(path)) => write!(f, "sqlite:{}", path.display()),
            (StoreKind::Sqlite, None) => write!(f, "sqlite:<no location>"),
            (StoreKind::InMemory, _) => write!(f, "in_memory"),
        }
    }
}
