//! Background execution bridge.
//!
//! # Responsibility
//! - Run caller work against a fresh background session.
//! - Surface the work's outcome as a `BackgroundResult` whose deliveries
//!   happen on the finishing pool.
//! - Chain dependent background steps.
//!
//! # Invariants
//! - Every bridged call resolves exactly once, including when the work
//!   panics or no session can be started.
//! - Subscribers never run on the background session's worker.

use crate::error::{Error, Result, SharedError};
use crate::manager::coordinator::Coordinator;
use crate::manager::StoreManager;
use crate::publisher::{Publisher, Scheduler};
use crate::session::{panic_message, Session, SessionContext, SessionKind};
use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Publisher of one background work outcome.
pub type BackgroundResult<T> = Publisher<T, SharedError>;

/// Thread pool that delivers background results to subscribers.
#[derive(Clone)]
pub struct FinishingPool {
    pool: Arc<ThreadPool>,
}

impl FinishingPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("objectstore-finish-{index}"))
            .build()
            .map_err(Error::Pool)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Scheduler for FinishingPool {
    fn schedule(&self, job: Box<dyn FnOnce() + Send>) {
        self.pool.spawn(job);
    }
}

#[derive(Clone)]
pub(crate) struct BackgroundBridge {
    coordinator: Arc<Coordinator>,
    finishing: FinishingPool,
}

impl BackgroundBridge {
    pub(crate) fn new(coordinator: Arc<Coordinator>, finishing: FinishingPool) -> Self {
        Self {
            coordinator,
            finishing,
        }
    }

    fn finishing(&self) -> Arc<dyn Scheduler> {
        Arc::new(self.finishing.clone())
    }

    pub(crate) fn run<T, F>(&self, work: F) -> BackgroundResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut SessionContext) -> Result<T> + Send + 'static,
    {
        let (resolver, publisher) = Publisher::pending();
        let publisher = publisher.receive_on(self.finishing());

        let session = match Session::spawn(SessionKind::Background, self.coordinator.clone()) {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    "event=background_run module=background status=error error_code=session_spawn_failed error={err}"
                );
                resolver.fail(Arc::new(err));
                return publisher;
            }
        };

        let session_id = session.id();
        session.perform(move |context| {
            let started_at = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| work(context))).unwrap_or_else(
                |payload| Err(Error::WorkPanicked(panic_message(payload.as_ref()))),
            );
            match &outcome {
                Ok(_) => debug!(
                    "event=background_run module=background status=ok session={session_id} duration_ms={}",
                    started_at.elapsed().as_millis()
                ),
                Err(err) => warn!(
                    "event=background_run module=background status=error session={session_id} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                ),
            }
            resolver.resolve(outcome.map_err(Arc::new));
        });
        publisher
    }
}

impl<T> Publisher<T, SharedError>
where
    T: Clone + Send + Sync + 'static,
{
    /// Runs `work` in a new background session once this result succeeds.
    ///
    /// A failure of this result is forwarded without running `work`.
    pub fn then_in_background<U, F>(&self, manager: &StoreManager, work: F) -> BackgroundResult<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&mut SessionContext, T) -> Result<U> + Send + 'static,
    {
        let bridge = manager.bridge().clone();
        let (resolver, downstream) = Publisher::pending();
        let downstream = downstream.receive_on(bridge.finishing());

        self.sink(move |outcome| match outcome {
            Ok(value) => {
                bridge
                    .run(move |context| work(context, value))
                    .sink(move |next| resolver.resolve(next));
            }
            Err(err) => resolver.fail(err),
        });
        downstream
    }
}

#[cfg(test)]
mod tests {
    use super::FinishingPool;
    use crate::publisher::Scheduler;

    #[test]
    fn finishing_pool_runs_jobs_on_named_threads() {
        let pool = FinishingPool::new(0).expect("pool");
        assert_eq!(pool.threads(), 1);

        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.schedule(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        }));
        let name = rx.recv().expect("job ran").expect("named thread");
        assert!(name.starts_with("objectstore-finish-"));
    }
}
