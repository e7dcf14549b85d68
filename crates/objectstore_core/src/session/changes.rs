//! Change notification fan-out for one session.

use crate::record::ObjectId;
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifiers touched by one batch of processed changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedObjects {
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub deleted: Vec<ObjectId>,
}

impl ChangedObjects {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.inserted.contains(&object)
            || self.updated.contains(&object)
            || self.deleted.contains(&object)
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

type Observer = Arc<dyn Fn(&ChangedObjects) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ChangeObservers {
    next_token: AtomicU64,
    entries: Mutex<Vec<(u64, Observer)>>,
}

impl ChangeObservers {
    pub(crate) fn register(self: &Arc<Self>, observer: Observer) -> ChangeSubscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((token, observer));
        ChangeSubscription {
            observers: Arc::downgrade(self),
            token,
        }
    }

    fn remove(&self, token: u64) {
        self.entries.lock().retain(|(entry, _)| *entry != token);
    }

    /// Calls every registered observer with `changes`.
    ///
    /// Observers run outside the registry lock, so they may register or
    /// cancel subscriptions themselves.
    pub(crate) fn notify(&self, changes: &ChangedObjects) {
        let snapshot: Vec<Observer> = self
            .entries
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        debug!(
            "event=changes_notify module=session status=ok observers={} objects={}",
            snapshot.len(),
            changes.len()
        );
        for observer in snapshot {
            observer(changes);
        }
    }
}

/// Live observer registration. Dropping it stops delivery.
#[must_use = "dropping the subscription unregisters the observer"]
pub struct ChangeSubscription {
    observers: Weak<ChangeObservers>,
    token: u64,
}

impl ChangeSubscription {
    /// Unregisters the observer now; same as dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeObservers, ChangedObjects};
    use crate::record::ObjectId;
    use crate::schema::EntityId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn dropped_subscription_stops_delivery() {
        let observers = Arc::new(ChangeObservers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let subscription = observers.register(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let changes = ChangedObjects {
            inserted: vec![ObjectId::new(EntityId(0), Uuid::new_v4())],
            ..ChangedObjects::default()
        };
        observers.notify(&changes);
        subscription.cancel();
        observers.notify(&changes);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
