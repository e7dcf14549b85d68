//! Sessions: a worker thread plus the context only that thread touches.
//!
//! # Responsibility
//! - Own one `SessionContext` per session on a dedicated worker thread.
//! - Queue caller work onto that thread (`perform`, `perform_and_wait`).
//! - Expose change observation for the session's context.
//!
//! # Invariants
//! - Jobs run one at a time, in submission order.
//! - A panicking job is logged and does not stop the worker.
//! - The worker exits once every `Session` handle is dropped and the queue
//!   is drained.

mod changes;
mod context;

pub use changes::{ChangeSubscription, ChangedObjects};
pub use context::SessionContext;

use crate::error::{Error, Result};
use crate::manager::coordinator::Coordinator;
use crate::record::ObjectId;
use changes::ChangeObservers;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce(&mut SessionContext) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Long-lived session serving the foreground.
    View,
    /// Private session for one unit of background work.
    Background,
}

impl SessionKind {
    fn label(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Background => "background",
        }
    }
}

impl Display for SessionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Cloneable handle to one session worker.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    id: u64,
    kind: SessionKind,
    jobs: Sender<Job>,
    worker: ThreadId,
    observers: Arc<ChangeObservers>,
}

impl Session {
    pub(crate) fn spawn(kind: SessionKind, coordinator: Arc<Coordinator>) -> Result<Self> {
        let id = coordinator.next_session_id();
        let (jobs, queue) = crossbeam_channel::unbounded::<Job>();
        let observers = Arc::new(ChangeObservers::default());
        let context_observers = observers.clone();

        let handle = thread::Builder::new()
            .name(format!("objectstore-{}-{id}", kind.label()))
            .spawn(move || {
                let context = SessionContext::new(id, kind, coordinator, context_observers);
                run_worker(context, queue);
            })
            .map_err(Error::Spawn)?;
        debug!("event=session_spawn module=session status=ok session={id} kind={kind}");

        Ok(Self {
            shared: Arc::new(SessionShared {
                id,
                kind,
                jobs,
                worker: handle.thread().id(),
                observers,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> SessionKind {
        self.shared.kind
    }

    /// Queues `work` on the session worker and returns immediately.
    pub fn perform<F>(&self, work: F)
    where
        F: FnOnce(&mut SessionContext) + Send + 'static,
    {
        if self.shared.jobs.send(Box::new(work)).is_err() {
            warn!(
                "event=session_perform module=session status=dropped session={} reason=worker_gone",
                self.shared.id
            );
        }
    }

    /// Runs `work` on the session worker and blocks for its result.
    ///
    /// # Errors
    /// - `ReentrantPerform` when called from this session's own worker.
    /// - `SessionClosed` when the worker is gone.
    /// - `WorkPanicked` when `work` panics.
    pub fn perform_and_wait<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionContext) -> T + Send + 'static,
    {
        if thread::current().id() == self.shared.worker {
            return Err(Error::ReentrantPerform);
        }
        let (reply, outcome) = crossbeam_channel::bounded(1);
        self.shared
            .jobs
            .send(Box::new(move |context: &mut SessionContext| {
                let result = catch_unwind(AssertUnwindSafe(|| work(context)))
                    .map_err(|payload| panic_message(payload.as_ref()));
                let _ = reply.send(result);
            }))
            .map_err(|_| Error::SessionClosed)?;

        match outcome.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::WorkPanicked(message)),
            Err(_) => Err(Error::SessionClosed),
        }
    }

    /// Observes every processed change batch of this session.
    pub fn on_objects_did_change<F>(&self, observer: F) -> ChangeSubscription
    where
        F: Fn(&ChangedObjects) + Send + Sync + 'static,
    {
        self.shared.observers.register(Arc::new(observer))
    }

    /// Observes change batches that touch `object`.
    pub fn on_object_did_change<F>(&self, object: ObjectId, observer: F) -> ChangeSubscription
    where
        F: Fn(ObjectId) + Send + Sync + 'static,
    {
        self.on_objects_did_change(move |changes| {
            if changes.contains(object) {
                observer(object);
            }
        })
    }
}

fn run_worker(mut context: SessionContext, queue: Receiver<Job>) {
    for job in queue.iter() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(&mut context))) {
            error!(
                "event=session_job module=session status=error session={} error_code=job_panicked error={}",
                context.id(),
                panic_message(payload.as_ref())
            );
        }
    }
    debug!(
        "event=session_close module=session status=ok session={}",
        context.id()
    );
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
