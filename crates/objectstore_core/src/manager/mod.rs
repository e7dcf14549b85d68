//! Store manager: model binding, store loading and session issuing.
//!
//! # Responsibility
//! - Bind one named container to an immutable model.
//! - Load every prepared store in parallel with a bounded wait and
//!   all-or-nothing, error-aggregating semantics.
//! - Own the foreground view session and issue background sessions.
//!
//! # Invariants
//! - Stores become visible to sessions only after a fully successful load.
//! - A failed or timed-out load leaves the previous store set untouched.
//! - Every load failure is reported; none is dropped.

mod config;
pub(crate) mod coordinator;

pub use crate::db::{StoreDescription, StoreKind};
pub use config::{
    ManagerConfig, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_FINISHING_THREADS, DEFAULT_LOAD_TIMEOUT_MS,
};

use crate::background::{BackgroundBridge, BackgroundResult, FinishingPool};
use crate::db::SqliteStore;
use crate::error::{Error, Result, StoreLoadError, StoreLoadFailure};
use crate::schema::Model;
use crate::session::{Session, SessionContext, SessionKind};
use coordinator::Coordinator;
use crossbeam_channel::RecvTimeoutError;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct StoreManager {
    name: String,
    config: ManagerConfig,
    coordinator: Arc<Coordinator>,
    descriptions: Mutex<Vec<StoreDescription>>,
    view_session: Session,
    bridge: BackgroundBridge,
}

impl StoreManager {
    /// Creates a manager with the default configuration.
    pub fn new(name: impl Into<String>, model: impl Into<Arc<Model>>) -> Result<Self> {
        Self::with_config(name, model, ManagerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        model: impl Into<Arc<Model>>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let finishing = FinishingPool::new(config.finishing_threads)?;
        Self::with_finishing_pool(name, model, config, finishing)
    }

    /// Creates a manager that delivers background results on `finishing`.
    ///
    /// Managers may share one pool.
    pub fn with_finishing_pool(
        name: impl Into<String>,
        model: impl Into<Arc<Model>>,
        config: ManagerConfig,
        finishing: FinishingPool,
    ) -> Result<Self> {
        let name = name.into();
        let coordinator = Arc::new(Coordinator::new(model.into()));
        let view_session = Session::spawn(SessionKind::View, coordinator.clone())?;
        let bridge = BackgroundBridge::new(coordinator.clone(), finishing);
        info!(
            "event=manager_init module=manager status=ok name={} model={} entities={}",
            name,
            coordinator.model().name(),
            coordinator.model().entities().len()
        );
        Ok(Self {
            name,
            config,
            coordinator,
            descriptions: Mutex::new(Vec::new()),
            view_session,
            bridge,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn model(&self) -> &Arc<Model> {
        self.coordinator.model()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Replaces the store descriptions the next load opens.
    ///
    /// The first description receives newly inserted records.
    pub fn prepare(&self, descriptions: Vec<StoreDescription>) {
        *self.descriptions.lock() = descriptions;
    }

    /// Prepares a single private in-memory store.
    pub fn prepare_in_memory(&self) {
        self.prepare(vec![StoreDescription::in_memory()]);
    }

    pub fn store_descriptions(&self) -> Vec<StoreDescription> {
        self.descriptions.lock().clone()
    }

    pub fn loaded_store_count(&self) -> usize {
        self.coordinator.store_count()
    }

    /// Loads every prepared store, waiting at most the configured timeout.
    pub fn load_stores(&self) -> Result<()> {
        self.load_stores_with_timeout(self.config.load_timeout())
    }

    /// Loads every prepared store in parallel, waiting at most `timeout`.
    ///
    /// # Errors
    /// - `LoadTimeout` when not every store reported before the deadline.
    /// - `LoadFailed` with one entry per failing store otherwise.
    /// - `Spawn` when a loader thread cannot be started.
    pub fn load_stores_with_timeout(&self, timeout: Duration) -> Result<()> {
        let descriptions = self.store_descriptions();
        let expected = descriptions.len();
        let started_at = Instant::now();
        let deadline = started_at + timeout;
        info!(
            "event=stores_load module=manager status=start stores={expected} timeout_ms={}",
            timeout.as_millis()
        );

        let (reports, inbox) = crossbeam_channel::unbounded();
        for (position, description) in descriptions.into_iter().enumerate() {
            let reports = reports.clone();
            let model = self.coordinator.model().clone();
            let busy_timeout = self.config.busy_timeout();
            thread::Builder::new()
                .name(format!("objectstore-load-{position}"))
                .spawn(move || {
                    let outcome = SqliteStore::open(&description, model, busy_timeout);
                    // The receiver is gone once the load timed out.
                    let _ = reports.send((position, description, outcome));
                })
                .map_err(Error::Spawn)?;
        }
        drop(reports);

        let mut loaded = Vec::with_capacity(expected);
        let mut failures = Vec::new();
        for reported in 0..expected {
            match inbox.recv_deadline(deadline) {
                Ok((position, _, Ok(store))) => loaded.push((position, Arc::new(store))),
                Ok((position, description, Err(error))) => {
                    warn!(
                        "event=store_load module=manager status=error store={description} error={error}"
                    );
                    failures.push((position, StoreLoadFailure { description, error }));
                }
                // A loader that died without reporting counts as not reported.
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    error!(
                        "event=stores_load module=manager status=error error_code=load_timeout reported={reported} expected={expected} duration_ms={}",
                        started_at.elapsed().as_millis()
                    );
                    return Err(Error::LoadTimeout {
                        timeout,
                        reported,
                        expected,
                    });
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(position, _)| *position);
            error!(
                "event=stores_load module=manager status=error error_code=load_failed failed={} expected={expected} duration_ms={}",
                failures.len(),
                started_at.elapsed().as_millis()
            );
            return Err(Error::LoadFailed(StoreLoadError {
                failures: failures.into_iter().map(|(_, failure)| failure).collect(),
            }));
        }

        loaded.sort_by_key(|(position, _)| *position);
        self.coordinator
            .replace_stores(loaded.into_iter().map(|(_, store)| store).collect());
        info!(
            "event=stores_load module=manager status=ok stores={expected} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// The long-lived foreground session.
    pub fn view_session(&self) -> &Session {
        &self.view_session
    }

    /// Starts a new background session with its own worker.
    pub fn new_background_session(&self) -> Result<Session> {
        Session::spawn(SessionKind::Background, self.coordinator.clone())
    }

    /// Runs `work` in a fresh background session.
    ///
    /// Never blocks; errors from `work` surface only through the returned
    /// publisher, whose deliveries run on the finishing pool.
    pub fn run_in_background<T, F>(&self, work: F) -> BackgroundResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut SessionContext) -> Result<T> + Send + 'static,
    {
        self.bridge.run(work)
    }

    pub(crate) fn bridge(&self) -> &BackgroundBridge {
        &self.bridge
    }
}
