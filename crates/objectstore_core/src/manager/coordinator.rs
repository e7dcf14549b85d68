//! Shared view over the loaded stores.
//!
//! Every session of one manager reads and commits through the same
//! coordinator. Reads merge rows from all stores; a commit groups changes
//! by the store each record lives in.

use crate::db::{RowChange, SqliteStore, StoredRow};
use crate::error::{Error, Result};
use crate::schema::{EntityDescription, Model};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct Coordinator {
    model: Arc<Model>,
    stores: RwLock<Vec<Arc<SqliteStore>>>,
    commit_lock: Mutex<()>,
    next_session: AtomicU64,
}

impl Coordinator {
    pub(crate) fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            stores: RwLock::new(Vec::new()),
            commit_lock: Mutex::new(()),
            next_session: AtomicU64::new(1),
        }
    }

    pub(crate) fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Swaps in a freshly loaded store set, in configuration order.
    pub(crate) fn replace_stores(&self, stores: Vec<Arc<SqliteStore>>) {
        *self.stores.write() = stores;
    }

    pub(crate) fn store_count(&self) -> usize {
        self.stores.read().len()
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// Store that receives newly inserted records.
    pub(crate) fn default_store(&self) -> Result<Uuid> {
        Ok(self.loaded()?[0].identifier())
    }

    /// Rows of `entity` from every store, tagged with their store.
    pub(crate) fn fetch_rows(&self, entity: &EntityDescription) -> Result<Vec<(Uuid, StoredRow)>> {
        let mut rows = Vec::new();
        for store in self.loaded()? {
            let identifier = store.identifier();
            rows.extend(
                store
                    .fetch_rows(entity)?
                    .into_iter()
                    .map(|row| (identifier, row)),
            );
        }
        Ok(rows)
    }

    /// Rows of `entity` carrying `local_id`, looked up through the index.
    pub(crate) fn fetch_by_local_id(
        &self,
        entity: &EntityDescription,
        local_id: Uuid,
    ) -> Result<Vec<(Uuid, StoredRow)>> {
        let mut rows = Vec::new();
        for store in self.loaded()? {
            let identifier = store.identifier();
            rows.extend(
                store
                    .fetch_by_local_id(entity, local_id)?
                    .into_iter()
                    .map(|row| (identifier, row)),
            );
        }
        Ok(rows)
    }

    pub(crate) fn fetch_row(
        &self,
        entity: &EntityDescription,
        key: Uuid,
    ) -> Result<Option<(Uuid, StoredRow)>> {
        for store in self.loaded()? {
            if let Some(row) = store.fetch_row(entity, key)? {
                return Ok(Some((store.identifier(), row)));
            }
        }
        Ok(None)
    }

    /// Applies per-store batches; each store commits atomically.
    ///
    /// Stores that committed are pushed onto `committed`, so a caller can
    /// settle their records even when a later store fails.
    pub(crate) fn commit(
        &self,
        batches: &BTreeMap<Uuid, Vec<RowChange>>,
        committed: &mut Vec<Uuid>,
    ) -> Result<()> {
        let stores = self.loaded()?;
        let mut targets = Vec::with_capacity(batches.len());
        for (identifier, batch) in batches {
            let store = stores
                .iter()
                .find(|store| store.identifier() == *identifier)
                .ok_or(Error::StoreUnavailable(*identifier))?;
            targets.push((store, batch));
        }

        let _guard = self.commit_lock.lock();
        for (store, batch) in targets {
            store.apply(batch)?;
            committed.push(store.identifier());
        }
        debug!(
            "event=coordinator_commit module=manager status=ok stores={}",
            batches.len()
        );
        Ok(())
    }

    fn loaded(&self) -> Result<Vec<Arc<SqliteStore>>> {
        let stores = self.stores.read().clone();
        if stores.is_empty() {
            return Err(Error::NoStoresLoaded);
        }
        Ok(stores)
    }
}
