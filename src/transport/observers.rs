// src/transport/observers.rs

//! Typed observer lists with explicit subscription tokens.
//!
//! Handlers are removed by the [`SubscriptionId`] returned at subscribe time,
//! never by comparing closures, so removing twice is a harmless no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::util::lock;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Token returned by `subscribe` / `on`; unique across all lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of handlers for one kind of notification.
pub struct ObserverList<T: ?Sized> {
    entries: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        let handler: Handler<T> = Arc::new(handler);
        lock(&self.entries).push((id, handler));
        id
    }

    /// Returns `true` if the subscription was present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(sub, _)| *sub != id);
        entries.len() != before
    }

    /// Call every handler in subscription order.
    ///
    /// The handler list is snapshotted first so handlers may subscribe or
    /// unsubscribe without deadlocking.
    pub fn notify(&self, value: &T) {
        let handlers: Vec<Handler<T>> = lock(&self.entries)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-event-name observer lists for transport events.
#[derive(Default)]
pub struct EventRegistry {
    lists: Mutex<HashMap<String, Arc<ObserverList<[Value]>>>>,
    owners: Mutex<HashMap<SubscriptionId, String>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = lock(&self.lists).keys().cloned().collect();
        f.debug_struct("EventRegistry")
            .field("events", &names)
            .finish()
    }
}

impl EventRegistry {
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let list = {
            let mut lists = lock(&self.lists);
            Arc::clone(lists.entry(event.to_string()).or_default())
        };
        let id = list.subscribe(handler);
        lock(&self.owners).insert(id, event.to_string());
        id
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        let Some(event) = lock(&self.owners).remove(&id) else {
            return false;
        };
        let list = lock(&self.lists).get(&event).cloned();
        list.is_some_and(|list| list.unsubscribe(id))
    }

    /// Deliver an event; returns the number of handlers that saw it.
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        let list = lock(&self.lists).get(event).cloned();
        match list {
            Some(list) => {
                let count = list.len();
                list.notify(args);
                count
            }
            None => 0,
        }
    }
}
