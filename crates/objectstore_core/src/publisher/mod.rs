//! Single-value, multicast, replaying result publisher.
//!
//! # Responsibility
//! - Carry exactly one outcome (a value or a failure) from a producer to
//!   any number of subscribers, whenever they subscribe.
//! - Honor per-subscriber demand and cancellation.
//! - Optionally deliver on a caller-chosen scheduler (`receive_on`).
//!
//! # Invariants
//! - The outcome is set at most once; later resolutions are ignored.
//! - Each subscriber sees at most one value, and a value is always
//!   followed by `Finished`.
//! - A value is delivered only after positive demand; failures are
//!   delivered regardless of demand.
//! - Nothing is delivered after `cancel`, including deliveries already
//!   queued on a scheduler.

mod sink;

pub use sink::Sink;

use crossbeam_channel::RecvTimeoutError;
use log::warn;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Executes deliveries somewhere other than the resolving thread.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, job: Box<dyn FnOnce() + Send>);
}

/// Terminal signal sent after the value, or instead of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<E> {
    Finished,
    Failed(E),
}

/// Receiver of one publisher outcome.
pub trait Subscriber<T, E>: Send + 'static {
    fn receive_value(&mut self, value: T);
    fn receive_completion(&mut self, completion: Completion<E>);
}

/// How many values a subscriber is ready to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    None,
    Max(usize),
    Unlimited,
}

impl Demand {
    pub fn max(count: usize) -> Self {
        if count == 0 {
            Self::None
        } else {
            Self::Max(count)
        }
    }

    pub fn is_positive(self) -> bool {
        match self {
            Self::None => false,
            Self::Max(count) => count > 0,
            Self::Unlimited => true,
        }
    }

    fn add(self, other: Demand) -> Demand {
        match (self, other) {
            (Self::Unlimited, _) | (_, Self::Unlimited) => Self::Unlimited,
            (Self::None, other) | (other, Self::None) => other,
            (Self::Max(left), Self::Max(right)) => Self::Max(left.saturating_add(right)),
        }
    }

    fn consume_one(self) -> Demand {
        match self {
            Self::Max(count) => Self::max(count.saturating_sub(1)),
            other => other,
        }
    }
}

struct Shared<T, E> {
    outcome: OnceCell<Result<T, E>>,
    waiting: Mutex<Vec<Arc<Slot<T, E>>>>,
    abandoned: AtomicBool,
}

struct Slot<T, E> {
    state: Mutex<SlotState<T, E>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

struct SlotState<T, E> {
    subscriber: Option<Box<dyn Subscriber<T, E>>>,
    demand: Demand,
    delivered: bool,
    cancelled: bool,
}

/// Consumer side: subscribe, sink or wait for the single outcome.
pub struct Publisher<T, E> {
    shared: Arc<Shared<T, E>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T, E> Clone for Publisher<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

/// Producer side. Consumed by the one resolution it performs.
pub struct Resolver<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<T, E>>,
}

/// Handle to one subscriber's delivery. Dropping it does not cancel.
pub struct Subscription<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<T, E>>,
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Publisher<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an unresolved publisher and the resolver that completes it.
    pub fn pending() -> (Resolver<T, E>, Self) {
        let shared = Arc::new(Shared {
            outcome: OnceCell::new(),
            waiting: Mutex::new(Vec::new()),
            abandoned: AtomicBool::new(false),
        });
        (
            Resolver {
                shared: shared.clone(),
            },
            Self {
                shared,
                scheduler: None,
            },
        )
    }

    /// Creates a publisher that already holds `outcome`.
    pub fn resolved(outcome: Result<T, E>) -> Self {
        let (resolver, publisher) = Self::pending();
        resolver.resolve(outcome);
        publisher
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// Same outcome, delivered to subscribers of the returned publisher
    /// through `scheduler`.
    pub fn receive_on(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            shared: self.shared.clone(),
            scheduler: Some(scheduler),
        }
    }

    /// Attaches `subscriber` with an initial `demand`.
    ///
    /// A resolved publisher replays its outcome to late subscribers.
    pub fn subscribe<S>(&self, subscriber: S, demand: Demand) -> Subscription<T, E>
    where
        S: Subscriber<T, E>,
    {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState {
                subscriber: Some(Box::new(subscriber)),
                demand,
                delivered: false,
                cancelled: false,
            }),
            scheduler: self.scheduler.clone(),
        });

        let ready = {
            let mut waiting = self.shared.waiting.lock();
            if self.shared.abandoned.load(Ordering::Acquire) {
                slot.state.lock().subscriber = None;
                false
            } else if self.shared.outcome.get().is_some() {
                true
            } else {
                waiting.push(slot.clone());
                false
            }
        };
        if ready {
            dispatch(&self.shared, &slot);
        }

        Subscription {
            shared: self.shared.clone(),
            slot,
        }
    }

    /// Subscribes with unlimited demand and hands the outcome to `callback`.
    pub fn sink<F>(&self, callback: F) -> Subscription<T, E>
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.subscribe(Sink::new(callback), Demand::Unlimited)
    }

    /// Blocks until the outcome is available.
    ///
    /// Returns `None` when the resolver was dropped without resolving.
    ///
    /// Blocks the calling thread. Calling this from a delivery running on a
    /// [`FinishingPool`] thread deadlocks when the awaited outcome is
    /// delivered by the same pool and no other pool thread is free.
    pub fn wait(&self) -> Option<Result<T, E>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sink(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.recv().ok()
    }

    /// Like `wait`, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let subscription = self.sink(move |outcome| {
            let _ = tx.send(outcome);
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => {
                subscription.cancel();
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn send(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: E) {
        self.resolve(Err(error));
    }

    pub fn resolve(self, outcome: Result<T, E>) {
        resolve_shared(&self.shared, outcome);
    }
}

impl<T, E> Drop for Resolver<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.shared.outcome.get().is_some() {
            return;
        }
        let abandoned = {
            let mut waiting = self.shared.waiting.lock();
            self.shared.abandoned.store(true, Ordering::Release);
            std::mem::take(&mut *waiting)
        };
        for slot in &abandoned {
            slot.state.lock().subscriber = None;
        }
        warn!(
            "event=publisher_abandon module=publisher status=error subscribers={}",
            abandoned.len()
        );
    }
}

impl<T, E> Subscription<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Adds `demand`; a resolved outcome is delivered once demand turns positive.
    pub fn request(&self, demand: Demand) {
        {
            let mut state = self.slot.state.lock();
            if state.cancelled || state.delivered {
                return;
            }
            state.demand = state.demand.add(demand);
        }
        if self.shared.outcome.get().is_some() {
            dispatch(&self.shared, &self.slot);
        }
    }

    /// Stops delivery and releases the subscriber.
    pub fn cancel(&self) {
        let released = {
            let mut state = self.slot.state.lock();
            state.cancelled = true;
            state.subscriber.take()
        };
        drop(released);
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.state.lock().cancelled
    }
}

fn resolve_shared<T, E>(shared: &Arc<Shared<T, E>>, outcome: Result<T, E>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if shared.outcome.set(outcome).is_err() {
        warn!("event=publisher_resolve module=publisher status=ignored reason=already_resolved");
        return;
    }
    let waiting = std::mem::take(&mut *shared.waiting.lock());
    for slot in &waiting {
        dispatch(shared, slot);
    }
}

fn dispatch<T, E>(shared: &Arc<Shared<T, E>>, slot: &Arc<Slot<T, E>>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    match &slot.scheduler {
        Some(scheduler) => {
            let shared = shared.clone();
            let slot = slot.clone();
            scheduler.schedule(Box::new(move || deliver(&shared, &slot)));
        }
        None => deliver(shared, slot),
    }
}

/// Delivers the outcome if the slot still wants it.
///
/// The checks run at delivery time, so a cancel that lands between
/// scheduling and execution wins.
fn deliver<T, E>(shared: &Shared<T, E>, slot: &Slot<T, E>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let Some(outcome) = shared.outcome.get() else {
        return;
    };
    let subscriber = {
        let mut state = slot.state.lock();
        if state.cancelled || state.delivered {
            return;
        }
        if outcome.is_ok() && !state.demand.is_positive() {
            return;
        }
        state.delivered = true;
        state.demand = state.demand.consume_one();
        state.subscriber.take()
    };

    let Some(mut subscriber) = subscriber else {
        return;
    };
    match outcome {
        Ok(value) => {
            subscriber.receive_value(value.clone());
            subscriber.receive_completion(Completion::Finished);
        }
        Err(error) => subscriber.receive_completion(Completion::Failed(error.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, Demand, Publisher, Scheduler, Subscriber};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber<i32, String> for Recorder {
        fn receive_value(&mut self, value: i32) {
            self.events.lock().push(format!("value:{value}"));
        }

        fn receive_completion(&mut self, completion: Completion<String>) {
            let event = match completion {
                Completion::Finished => "finished".to_string(),
                Completion::Failed(error) => format!("failed:{error}"),
            };
            self.events.lock().push(event);
        }
    }

    /// Holds jobs until the test runs them.
    #[derive(Default)]
    struct ManualScheduler {
        jobs: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    }

    impl ManualScheduler {
        fn run_all(&self) {
            let jobs = std::mem::take(&mut *self.jobs.lock());
            for job in jobs {
                job();
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, job: Box<dyn FnOnce() + Send>) {
            self.jobs.lock().push(job);
        }
    }

    #[test]
    fn demand_gates_values_but_not_failures() {
        let (resolver, publisher) = Publisher::<i32, String>::pending();
        let held = Recorder::default();
        let subscription = publisher.subscribe(held.clone(), Demand::None);
        resolver.send(7);
        assert!(held.events.lock().is_empty());

        subscription.request(Demand::max(1));
        assert_eq!(*held.events.lock(), ["value:7", "finished"]);

        let failing = Publisher::<i32, String>::resolved(Err("boom".to_string()));
        let recorder = Recorder::default();
        failing.subscribe(recorder.clone(), Demand::None);
        assert_eq!(*recorder.events.lock(), ["failed:boom"]);
    }

    #[test]
    fn second_resolution_is_ignored() {
        let (resolver, publisher) = Publisher::<i32, String>::pending();
        let shared = resolver.shared.clone();
        resolver.send(1);
        super::resolve_shared(&shared, Ok(2));
        assert_eq!(publisher.wait(), Some(Ok(1)));
    }

    #[test]
    fn cancel_before_scheduled_delivery_wins() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (resolver, publisher) = Publisher::<i32, String>::pending();
        let publisher = publisher.receive_on(scheduler.clone());

        let recorder = Recorder::default();
        let subscription = publisher.subscribe(recorder.clone(), Demand::Unlimited);
        resolver.send(3);
        subscription.cancel();
        scheduler.run_all();

        assert!(recorder.events.lock().is_empty());
        assert!(subscription.is_cancelled());
    }

    #[test]
    fn dropped_resolver_releases_waiters() {
        let (resolver, publisher) = Publisher::<i32, String>::pending();
        drop(resolver);
        assert_eq!(publisher.wait(), None);
        assert!(!publisher.is_resolved());
    }
}
