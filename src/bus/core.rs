use crate::bus::exception::SubscriberExceptionHandler;
use crate::event::{DeadEvent, PostedEvent};
use crate::intercept::chain::InterceptorChain;
use crate::process::processor::DispatchEnv;
use crate::process::retry::CancelToken;
use crate::registry::core::{RegistryError, SubscriberRegistry};
use crate::registry::listener::Listener;
use crate::registry::subscriber::Subscriber;
use std::sync::Arc;
use tracing::debug;

/// State shared by the sync and pooled buses: the registry, the
/// interceptor chain and the exception hook.
pub(crate) struct BusCore {
    identifier: String,
    registry: SubscriberRegistry,
    interceptors: InterceptorChain,
    exception_handler: Box<dyn SubscriberExceptionHandler>,
}

impl BusCore {
    pub(crate) fn new(
        identifier: String,
        max_subscribers_per_event: usize,
        interceptors: InterceptorChain,
        exception_handler: Box<dyn SubscriberExceptionHandler>,
    ) -> Self {
        Self {
            identifier,
            registry: SubscriberRegistry::new(max_subscribers_per_event),
            interceptors,
            exception_handler,
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn register(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        let added = self.registry.register(listener)?;
        debug!(
            bus = self.identifier(),
            listener = listener.label(),
            subscribers = added,
            "listener registered",
        );
        Ok(())
    }

    pub(crate) fn unregister(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        let removed = self.registry.unregister(listener)?;
        debug!(
            bus = self.identifier(),
            listener = listener.label(),
            subscribers = removed,
            "listener unregistered",
        );
        Ok(())
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    pub(crate) fn env<'a>(&'a self, cancel: &'a CancelToken) -> DispatchEnv<'a> {
        DispatchEnv {
            bus_identifier: &self.identifier,
            interceptors: &self.interceptors,
            exception_handler: self.exception_handler.as_ref(),
            cancel,
        }
    }

    /// Resolves the subscriber set for an event. An event nobody matches
    /// is wrapped into a [`DeadEvent`] and resolved once more; a dead
    /// event nobody matches is dropped.
    pub(crate) fn resolve(
        &self,
        event: PostedEvent,
    ) -> Option<(PostedEvent, Vec<Arc<Subscriber>>)> {
        let subscribers = self.registry.lookup(event.type_id());
        if !subscribers.is_empty() {
            return Some((event, subscribers));
        }
        if event.is::<DeadEvent>() {
            debug!(bus = self.identifier(), "dead event had no subscriber; dropping");
            return None;
        }
        let dead = PostedEvent::new(DeadEvent::new(event));
        let subscribers = self.registry.lookup(dead.type_id());
        if subscribers.is_empty() {
            debug!(
                bus = self.identifier(),
                "event had no subscriber and no dead-event listener; dropping",
            );
            return None;
        }
        Some((dead, subscribers))
    }
}
