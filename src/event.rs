use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Type-erased event payload shared between subscribers and interceptors.
pub type AnyEvent = dyn Any + Send + Sync;

/// An event captured at `post` time together with its dispatch identity.
///
/// The concrete type is erased behind an `Arc` so one posted value can be
/// handed to any number of subscribers across threads; the `TypeId` and the
/// type name are recorded before erasure because neither can be recovered
/// from the trait object afterwards.
#[derive(Clone)]
pub struct PostedEvent {
    payload: Arc<AnyEvent>,
    type_id: TypeId,
    type_label: &'static str,
}

impl PostedEvent {
    pub fn new<E: Any + Send + Sync>(event: E) -> Self {
        Self {
            payload: Arc::new(event),
            type_id: TypeId::of::<E>(),
            type_label: std::any::type_name::<E>(),
        }
    }

    /// The erased payload.
    pub fn payload(&self) -> &Arc<AnyEvent> {
        &self.payload
    }

    /// Dispatch key of the concrete event type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified name of the concrete event type, for logs and stats.
    pub fn type_label(&self) -> &'static str {
        self.type_label
    }

    pub fn is<E: Any + Send + Sync>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    pub fn downcast_ref<E: Any + Send + Sync>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for PostedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostedEvent")
            .field("type", &self.type_label)
            .finish()
    }
}

/// Wrapper re-posted when an event reaches no subscriber at all.
///
/// Listeners interested in lost events subscribe to `DeadEvent` like any
/// other type. A `DeadEvent` that itself finds no subscriber is dropped
/// rather than wrapped again.
#[derive(Clone)]
pub struct DeadEvent {
    event: PostedEvent,
}

impl DeadEvent {
    pub(crate) fn new(event: PostedEvent) -> Self {
        Self { event }
    }

    /// The original event that found no subscriber.
    pub fn event(&self) -> &PostedEvent {
        &self.event
    }
}

impl fmt::Debug for DeadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadEvent")
            .field("type", &self.event.type_label())
            .finish()
    }
}
