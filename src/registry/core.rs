use crate::registry::listener::Listener;
use crate::registry::subscriber::Subscriber;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::warn;

/// Key an event resolves under. The flattened "type hierarchy" of an
/// event is the fixed sequence `Typed(id)` then `Wildcard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Typed(TypeId),
    Wildcard,
}

/// Errors raised by listener construction and registry lifecycle calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate primary handler for event type {event_type}")]
    DuplicatePrimary { event_type: &'static str },
    #[error("duplicate {marker} handler for event type {event_type}")]
    DuplicateMarker {
        marker: &'static str,
        event_type: &'static str,
    },
    #[error("handler group for {event_type} has no primary handler")]
    MissingPrimary { event_type: &'static str },
    #[error("listener is not registered")]
    NotRegistered,
}

/// Maps dispatch keys to subscriber lists in registration order.
///
/// Per-key lists are copy-on-write: `lookup` clones the `Arc`s under a
/// read lock, so a post in progress keeps a stable subscriber set no
/// matter what register/unregister does concurrently.
pub struct SubscriberRegistry {
    state: RwLock<RegistryState>,
    max_subscribers_per_event: usize,
}

struct RegistryState {
    index: HashMap<DispatchKey, Arc<Vec<Arc<Subscriber>>>>,
    listeners: HashMap<usize, Vec<Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new(max_subscribers_per_event: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                index: HashMap::new(),
                listeners: HashMap::new(),
            }),
            max_subscribers_per_event,
        }
    }

    /// Adds every group of `listener`. Registering an already-registered
    /// listener is a no-op; the returned count is the number of
    /// subscribers actually added.
    pub(crate) fn register(&self, listener: &Arc<Listener>) -> Result<usize, RegistryError> {
        let key = Arc::as_ptr(listener) as *const () as usize;
        let mut state = self.state.write().unwrap();
        if state.listeners.contains_key(&key) {
            return Ok(0);
        }
        let subscribers: Vec<Arc<Subscriber>> = (0..listener.groups().len())
            .map(|index| Subscriber::new(listener.clone(), index))
            .collect();
        for subscriber in &subscribers {
            let list = state
                .index
                .entry(subscriber.group().key())
                .or_insert_with(|| Arc::new(Vec::new()));
            let mut next = (**list).clone();
            next.push(subscriber.clone());
            if next.len() > self.max_subscribers_per_event {
                warn!(
                    event = subscriber.group().event_label(),
                    count = next.len(),
                    limit = self.max_subscribers_per_event,
                    "subscriber count crossed the advisory per-event limit",
                );
            }
            *list = Arc::new(next);
        }
        let added = subscribers.len();
        state.listeners.insert(key, subscribers);
        Ok(added)
    }

    /// Drops every subscriber belonging to `listener`.
    pub(crate) fn unregister(&self, listener: &Arc<Listener>) -> Result<usize, RegistryError> {
        let key = Arc::as_ptr(listener) as *const () as usize;
        let mut state = self.state.write().unwrap();
        let removed = state
            .listeners
            .remove(&key)
            .ok_or(RegistryError::NotRegistered)?;
        for subscriber in &removed {
            let dispatch_key = subscriber.group().key();
            let next: Option<Vec<Arc<Subscriber>>> = state.index.get(&dispatch_key).map(|list| {
                list.iter()
                    .filter(|s| s.listener_ptr() != key)
                    .cloned()
                    .collect()
            });
            if let Some(next) = next {
                if next.is_empty() {
                    state.index.remove(&dispatch_key);
                } else {
                    state.index.insert(dispatch_key, Arc::new(next));
                }
            }
        }
        Ok(removed.len())
    }

    /// Subscribers for an event of the given concrete type: typed first,
    /// then wildcard, each in registration order.
    pub(crate) fn lookup(&self, type_id: TypeId) -> Vec<Arc<Subscriber>> {
        let (typed, wildcard) = {
            let state = self.state.read().unwrap();
            (
                state.index.get(&DispatchKey::Typed(type_id)).cloned(),
                state.index.get(&DispatchKey::Wildcard).cloned(),
            )
        };
        let mut merged = Vec::new();
        if let Some(list) = typed {
            merged.extend(list.iter().cloned());
        }
        if let Some(list) = wildcard {
            merged.extend(list.iter().cloned());
        }
        merged
    }

    /// Total live subscribers across every key.
    pub(crate) fn subscriber_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .listeners
            .values()
            .map(Vec::len)
            .sum()
    }
}
