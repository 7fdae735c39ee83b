use crate::bus::core::BusCore;
use crate::bus::exception::{LoggingSubscriberExceptionHandler, SubscriberExceptionHandler};
use crate::config::BusConfig;
use crate::event::PostedEvent;
use crate::intercept::chain::InterceptorChain;
use crate::intercept::interceptor::EventInterceptor;
use crate::process::processor::process_event;
use crate::process::retry::CancelToken;
use crate::registry::core::RegistryError;
use crate::registry::listener::Listener;
use crate::registry::subscriber::Subscriber;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Synchronous event bus with reentrant dispatch.
///
/// `post` drains on the calling thread: events posted from inside a
/// handler are queued and dispatched after the current event's subscriber
/// list completes, preserving depth-first causal order without growing
/// the stack. Interceptors must not call [`post`](Self::post) on this bus
/// from within a hook; the drain loop is not reentrant for them.
///
/// The bus itself is safe to share: `post`, `register` and `unregister`
/// may be called from any number of threads.
pub struct EventBus {
    core: Arc<BusCore>,
    cancel: CancelToken,
}

impl EventBus {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self::builder(identifier).build()
    }

    pub fn builder(identifier: impl Into<String>) -> EventBusBuilder {
        EventBusBuilder {
            identifier: identifier.into(),
            interceptors: Vec::new(),
            exception_handler: None,
            max_subscribers_per_event: BusConfig::default().max_subscribers_per_event,
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::builder(config.identifier.clone())
            .max_subscribers_per_event(config.max_subscribers_per_event)
            .build()
    }

    pub fn identifier(&self) -> &str {
        self.core.identifier()
    }

    pub fn register(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        self.core.register(listener)
    }

    pub fn unregister(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        self.core.unregister(listener)
    }

    /// Live subscribers across every event type.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    pub fn post<E: Any + Send + Sync>(&self, event: E) {
        self.post_event(PostedEvent::new(event));
    }

    fn post_event(&self, event: PostedEvent) {
        let Some((event, subscribers)) = self.core.resolve(event) else {
            return;
        };
        let key = Arc::as_ptr(&self.core) as usize;
        let drain_here = DISPATCH_STATES.with(|states| {
            let mut map = states.borrow_mut();
            let state = map.entry(key).or_default();
            state.queue.push_back(QueuedDispatch { event, subscribers });
            !std::mem::replace(&mut state.dispatching, true)
        });
        if !drain_here {
            return;
        }
        let env = self.core.env(&self.cancel);
        loop {
            let next = DISPATCH_STATES.with(|states| {
                states
                    .borrow_mut()
                    .get_mut(&key)
                    .and_then(|state| state.queue.pop_front())
            });
            let Some(dispatch) = next else { break };
            for subscriber in &dispatch.subscribers {
                process_event(subscriber, &dispatch.event, &env);
            }
        }
        DISPATCH_STATES.with(|states| {
            states.borrow_mut().remove(&key);
        });
    }
}

struct QueuedDispatch {
    event: PostedEvent,
    subscribers: Vec<Arc<Subscriber>>,
}

#[derive(Default)]
struct ThreadDispatchState {
    queue: VecDeque<QueuedDispatch>,
    dispatching: bool,
}

thread_local! {
    /// Per-thread dispatch state keyed by bus instance, so independent
    /// buses never interleave their drain loops.
    static DISPATCH_STATES: RefCell<HashMap<usize, ThreadDispatchState>> =
        RefCell::new(HashMap::new());
}

pub struct EventBusBuilder {
    identifier: String,
    interceptors: Vec<Arc<dyn EventInterceptor>>,
    exception_handler: Option<Box<dyn SubscriberExceptionHandler>>,
    max_subscribers_per_event: usize,
}

impl EventBusBuilder {
    pub fn interceptor(mut self, interceptor: Arc<dyn EventInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn exception_handler(
        mut self,
        handler: impl SubscriberExceptionHandler + 'static,
    ) -> Self {
        self.exception_handler = Some(Box::new(handler));
        self
    }

    pub fn max_subscribers_per_event(mut self, limit: usize) -> Self {
        self.max_subscribers_per_event = limit;
        self
    }

    pub fn build(self) -> EventBus {
        let exception_handler = self
            .exception_handler
            .unwrap_or_else(|| Box::new(LoggingSubscriberExceptionHandler));
        EventBus {
            core: Arc::new(BusCore::new(
                self.identifier,
                self.max_subscribers_per_event,
                InterceptorChain::new(self.interceptors),
                exception_handler,
            )),
            cancel: CancelToken::new(),
        }
    }
}
