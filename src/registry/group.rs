use crate::event::PostedEvent;
use crate::process::failure::{FailureContext, SystemFault};
use crate::process::retry::RetryPolicy;
use crate::registry::core::{DispatchKey, RegistryError};
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

pub(crate) type PrimaryFn = dyn Fn(&PostedEvent) -> anyhow::Result<()> + Send + Sync;
pub(crate) type PredicateFn = dyn Fn(&PostedEvent) -> anyhow::Result<bool> + Send + Sync;

/// Terminal failure handler; the two variants mirror the one- and
/// two-argument handler shapes.
pub(crate) enum FailureHandler {
    EventOnly(Box<dyn Fn(&PostedEvent) + Send + Sync>),
    WithContext(Box<dyn Fn(&PostedEvent, &FailureContext) + Send + Sync>),
}

impl FailureHandler {
    pub(crate) fn invoke(&self, event: &PostedEvent, ctx: &FailureContext) {
        match self {
            FailureHandler::EventOnly(handler) => handler(event),
            FailureHandler::WithContext(handler) => handler(event, ctx),
        }
    }
}

/// The handlers one listener holds for one event type: a mandatory
/// primary, plus optional idempotency gate, failure handler, retry policy
/// and concurrency opt-out.
pub struct HandlerGroup {
    key: DispatchKey,
    event_label: &'static str,
    pub(crate) primary: Box<PrimaryFn>,
    pub(crate) idempotent: Option<Box<PredicateFn>>,
    pub(crate) failure: Option<FailureHandler>,
    retry: Option<RetryPolicy>,
    concurrent_safe: bool,
}

impl HandlerGroup {
    /// Starts a group for events of concrete type `E`.
    pub fn of<E: Any + Send + Sync>() -> HandlerGroupBuilder<E> {
        HandlerGroupBuilder {
            primary: None,
            idempotent: None,
            failure: None,
            retry: None,
            concurrent_safe: false,
            duplicate_primary: false,
            duplicate_marker: None,
            _event: PhantomData,
        }
    }

    /// Starts a group receiving every event posted to the bus, the
    /// counterpart of subscribing to the root of a type hierarchy.
    pub fn wildcard() -> WildcardGroupBuilder {
        WildcardGroupBuilder {
            primary: None,
            idempotent: None,
            failure: None,
            retry: None,
            concurrent_safe: false,
            duplicate_primary: false,
            duplicate_marker: None,
        }
    }

    pub(crate) fn key(&self) -> DispatchKey {
        self.key
    }

    /// Name of the handled event type, `*` for wildcard groups.
    pub fn event_label(&self) -> &'static str {
        self.event_label
    }

    pub fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }

    pub fn concurrent_safe(&self) -> bool {
        self.concurrent_safe
    }

    pub fn has_idempotent(&self) -> bool {
        self.idempotent.is_some()
    }

    pub fn has_failure_handler(&self) -> bool {
        self.failure.is_some()
    }
}

impl fmt::Debug for HandlerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerGroup")
            .field("event", &self.event_label)
            .field("idempotent", &self.idempotent.is_some())
            .field("failure", &self.failure.is_some())
            .field("retry", &self.retry)
            .field("concurrent_safe", &self.concurrent_safe)
            .finish()
    }
}

fn typed_payload<E: Any + Send + Sync>(event: &PostedEvent) -> anyhow::Result<&E> {
    event.downcast_ref::<E>().ok_or_else(|| {
        anyhow::Error::new(SystemFault::PayloadType).context(format!(
            "handler expects {}, event is {}",
            std::any::type_name::<E>(),
            event.type_label(),
        ))
    })
}

/// Builder assembling a [`HandlerGroup`] for a concrete event type.
///
/// Setting the same handler kind twice is recorded and reported by
/// [`build`](Self::build); the winning value is the first one.
pub struct HandlerGroupBuilder<E> {
    primary: Option<Box<PrimaryFn>>,
    idempotent: Option<Box<PredicateFn>>,
    failure: Option<FailureHandler>,
    retry: Option<RetryPolicy>,
    concurrent_safe: bool,
    duplicate_primary: bool,
    duplicate_marker: Option<&'static str>,
    _event: PhantomData<fn(&E)>,
}

impl<E: Any + Send + Sync> HandlerGroupBuilder<E> {
    /// The mandatory primary handler.
    pub fn primary<F>(mut self, handler: F) -> Self
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.primary.is_some() {
            self.duplicate_primary = true;
            return self;
        }
        self.primary = Some(Box::new(move |event: &PostedEvent| {
            handler(typed_payload::<E>(event)?)
        }));
        self
    }

    /// Idempotency gate: `Ok(false)` skips the dispatch, an error is a
    /// system fault routed to the failure branch.
    pub fn idempotent<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        if self.idempotent.is_some() {
            self.duplicate_marker.get_or_insert("idempotent");
            return self;
        }
        self.idempotent = Some(Box::new(move |event: &PostedEvent| {
            predicate(typed_payload::<E>(event)?)
        }));
        self
    }

    /// Terminal failure handler receiving only the event.
    pub fn failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        if self.failure.is_some() {
            self.duplicate_marker.get_or_insert("failure");
            return self;
        }
        self.failure = Some(FailureHandler::EventOnly(Box::new(
            move |event: &PostedEvent| {
                if let Some(typed) = event.downcast_ref::<E>() {
                    handler(typed);
                }
            },
        )));
        self
    }

    /// Terminal failure handler receiving the event and its [`FailureContext`].
    pub fn failure_with_context<F>(mut self, handler: F) -> Self
    where
        F: Fn(&E, &FailureContext) + Send + Sync + 'static,
    {
        if self.failure.is_some() {
            self.duplicate_marker.get_or_insert("failure");
            return self;
        }
        self.failure = Some(FailureHandler::WithContext(Box::new(
            move |event: &PostedEvent, ctx: &FailureContext| {
                if let Some(typed) = event.downcast_ref::<E>() {
                    handler(typed, ctx);
                }
            },
        )));
        self
    }

    /// Retry modifier for the primary handler.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Declares the primary handler reentrantly thread-safe, opting out of
    /// per-subscriber serialization.
    pub fn allow_concurrent(mut self) -> Self {
        self.concurrent_safe = true;
        self
    }

    pub fn build(self) -> Result<HandlerGroup, RegistryError> {
        let event_label = std::any::type_name::<E>();
        if self.duplicate_primary {
            return Err(RegistryError::DuplicatePrimary {
                event_type: event_label,
            });
        }
        if let Some(marker) = self.duplicate_marker {
            return Err(RegistryError::DuplicateMarker {
                marker,
                event_type: event_label,
            });
        }
        let primary = self
            .primary
            .ok_or(RegistryError::MissingPrimary {
                event_type: event_label,
            })?;
        Ok(HandlerGroup {
            key: DispatchKey::Typed(TypeId::of::<E>()),
            event_label,
            primary,
            idempotent: self.idempotent,
            failure: self.failure,
            retry: self.retry,
            concurrent_safe: self.concurrent_safe,
        })
    }
}

/// Builder assembling a wildcard [`HandlerGroup`]; handlers receive the
/// type-erased [`PostedEvent`].
pub struct WildcardGroupBuilder {
    primary: Option<Box<PrimaryFn>>,
    idempotent: Option<Box<PredicateFn>>,
    failure: Option<FailureHandler>,
    retry: Option<RetryPolicy>,
    concurrent_safe: bool,
    duplicate_primary: bool,
    duplicate_marker: Option<&'static str>,
}

impl WildcardGroupBuilder {
    pub fn primary<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PostedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.primary.is_some() {
            self.duplicate_primary = true;
            return self;
        }
        self.primary = Some(Box::new(handler));
        self
    }

    pub fn idempotent<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PostedEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        if self.idempotent.is_some() {
            self.duplicate_marker.get_or_insert("idempotent");
            return self;
        }
        self.idempotent = Some(Box::new(predicate));
        self
    }

    pub fn failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PostedEvent) + Send + Sync + 'static,
    {
        if self.failure.is_some() {
            self.duplicate_marker.get_or_insert("failure");
            return self;
        }
        self.failure = Some(FailureHandler::EventOnly(Box::new(handler)));
        self
    }

    pub fn failure_with_context<F>(mut self, handler: F) -> Self
    where
        F: Fn(&PostedEvent, &FailureContext) + Send + Sync + 'static,
    {
        if self.failure.is_some() {
            self.duplicate_marker.get_or_insert("failure");
            return self;
        }
        self.failure = Some(FailureHandler::WithContext(Box::new(handler)));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn allow_concurrent(mut self) -> Self {
        self.concurrent_safe = true;
        self
    }

    pub fn build(self) -> Result<HandlerGroup, RegistryError> {
        if self.duplicate_primary {
            return Err(RegistryError::DuplicatePrimary { event_type: "*" });
        }
        if let Some(marker) = self.duplicate_marker {
            return Err(RegistryError::DuplicateMarker {
                marker,
                event_type: "*",
            });
        }
        let primary = self
            .primary
            .ok_or(RegistryError::MissingPrimary { event_type: "*" })?;
        Ok(HandlerGroup {
            key: DispatchKey::Wildcard,
            event_label: "*",
            primary,
            idempotent: self.idempotent,
            failure: self.failure,
            retry: self.retry,
            concurrent_safe: self.concurrent_safe,
        })
    }
}
