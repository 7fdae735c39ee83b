use crate::bus::core::BusCore;
use crate::bus::exception::{LoggingSubscriberExceptionHandler, SubscriberExceptionHandler};
use crate::config::{BusConfig, DelayedConfig};
use crate::event::PostedEvent;
use crate::intercept::chain::InterceptorChain;
use crate::intercept::interceptor::EventInterceptor;
use crate::process::processor::process_event;
use crate::registry::core::RegistryError;
use crate::registry::listener::Listener;
use crate::registry::subscriber::Subscriber;
use crate::runtime::pool::DispatchPool;
use crate::runtime::scheduler::{DelayedHandle, DelayedScheduler};
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Event bus dispatching through a worker pool.
///
/// `post` resolves the subscriber set synchronously on the caller, then
/// feeds every subscriber through its own FIFO lane, so each subscriber
/// observes events in post order; across subscribers nothing is ordered.
/// Subscribers that opted into concurrent invocation keep that start
/// order but may execute overlapping; all others run one event to
/// completion at a time. Also exposes delayed publication via
/// [`post_delayed`](Self::post_delayed).
///
/// The pool and the delayed scheduler are shut down on drop only when the
/// bus created them; externally supplied ones stay untouched.
pub struct AsyncEventBus {
    inner: Arc<AsyncInner>,
    owns_pool: bool,
}

struct AsyncInner {
    core: BusCore,
    pool: Arc<DispatchPool>,
    delayed: DelayedConfig,
    scheduler: Mutex<Option<SchedulerSlot>>,
}

struct SchedulerSlot {
    scheduler: Arc<DelayedScheduler>,
    owned: bool,
}

impl AsyncEventBus {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self::builder(identifier).build()
    }

    pub fn builder(identifier: impl Into<String>) -> AsyncEventBusBuilder {
        let defaults = BusConfig::default();
        AsyncEventBusBuilder {
            identifier: identifier.into(),
            interceptors: Vec::new(),
            exception_handler: None,
            max_subscribers_per_event: defaults.max_subscribers_per_event,
            workers: defaults.async_workers,
            pool: None,
            delayed: defaults.delayed,
            scheduler: None,
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::builder(config.identifier.clone())
            .workers(config.async_workers)
            .max_subscribers_per_event(config.max_subscribers_per_event)
            .delayed(config.delayed.clone())
            .build()
    }

    pub fn identifier(&self) -> &str {
        self.inner.core.identifier()
    }

    pub fn register(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        self.inner.core.register(listener)
    }

    pub fn unregister(&self, listener: &Arc<Listener>) -> Result<(), RegistryError> {
        self.inner.core.unregister(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    pub fn post<E: Any + Send + Sync>(&self, event: E) {
        AsyncInner::post_event(&self.inner, PostedEvent::new(event));
    }

    /// Publishes `event` after `delay`. A zero delay posts immediately on
    /// the calling thread. The returned handle cancels the pending task;
    /// `None` when nothing was scheduled.
    pub fn post_delayed<E: Any + Send + Sync>(
        &self,
        event: E,
        delay: Duration,
    ) -> Option<DelayedHandle> {
        let event = PostedEvent::new(event);
        if !self.inner.delayed.enabled {
            warn!(
                bus = self.identifier(),
                event = event.type_label(),
                "delayed dispatch is disabled; posting immediately",
            );
            AsyncInner::post_event(&self.inner, event);
            return None;
        }
        if delay.is_zero() {
            AsyncInner::post_event(&self.inner, event);
            return None;
        }
        debug!(
            bus = self.identifier(),
            event = event.type_label(),
            delay_ms = delay.as_millis() as u64,
            "scheduling delayed event",
        );
        let inner = self.inner.clone();
        self.scheduler()
            .schedule(delay, move || AsyncInner::post_event(&inner, event))
    }

    fn scheduler(&self) -> Arc<DelayedScheduler> {
        let mut slot = self.inner.scheduler.lock().unwrap();
        if let Some(slot) = slot.as_ref() {
            return slot.scheduler.clone();
        }
        let scheduler = Arc::new(DelayedScheduler::start(&self.inner.delayed));
        *slot = Some(SchedulerSlot {
            scheduler: scheduler.clone(),
            owned: true,
        });
        scheduler
    }
}

impl Drop for AsyncEventBus {
    fn drop(&mut self) {
        if let Some(slot) = self.inner.scheduler.lock().unwrap().take() {
            if slot.owned {
                slot.scheduler.shutdown();
            }
        }
        if self.owns_pool {
            self.inner.pool.shutdown();
        }
    }
}

impl AsyncInner {
    fn post_event(inner: &Arc<AsyncInner>, event: PostedEvent) {
        let Some((event, subscribers)) = inner.core.resolve(event) else {
            return;
        };
        for subscriber in subscribers {
            Self::submit(inner, subscriber, event.clone());
        }
    }

    fn submit(inner: &Arc<AsyncInner>, subscriber: Arc<Subscriber>, event: PostedEvent) {
        let drain = {
            let mut lane = subscriber.lane().lock().unwrap();
            lane.queue.push_back(event);
            !std::mem::replace(&mut lane.scheduled, true)
        };
        if drain {
            let task_inner = inner.clone();
            let lane_subscriber = subscriber.clone();
            let accepted = inner
                .pool
                .execute(move || AsyncInner::drain_lane(&task_inner, &lane_subscriber));
            if !accepted {
                let mut lane = subscriber.lane().lock().unwrap();
                lane.scheduled = false;
                lane.queue.clear();
            }
        }
    }

    fn run_one(&self, subscriber: &Subscriber, event: &PostedEvent) {
        let env = self.core.env(self.pool.cancel_token());
        process_event(subscriber, event, &env);
    }

    /// Empties one subscriber's lane. Serialized subscribers run each
    /// event to completion before the next pop; concurrent-safe ones have
    /// their invocations handed back to the pool in lane order without
    /// waiting, so starts stay FIFO while executions may overlap.
    fn drain_lane(inner: &Arc<AsyncInner>, subscriber: &Arc<Subscriber>) {
        let concurrent = subscriber.group().concurrent_safe();
        loop {
            let next = {
                let mut lane = subscriber.lane().lock().unwrap();
                let next = lane.queue.pop_front();
                if next.is_none() {
                    lane.scheduled = false;
                }
                next
            };
            let Some(event) = next else { break };
            if concurrent {
                let task_inner = inner.clone();
                let task_subscriber = subscriber.clone();
                inner
                    .pool
                    .execute(move || task_inner.run_one(&task_subscriber, &event));
            } else {
                inner.run_one(subscriber, &event);
            }
        }
    }
}

pub struct AsyncEventBusBuilder {
    identifier: String,
    interceptors: Vec<Arc<dyn EventInterceptor>>,
    exception_handler: Option<Box<dyn SubscriberExceptionHandler>>,
    max_subscribers_per_event: usize,
    workers: usize,
    pool: Option<Arc<DispatchPool>>,
    delayed: DelayedConfig,
    scheduler: Option<Arc<DelayedScheduler>>,
}

impl AsyncEventBusBuilder {
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

    /// Worker count for the pool the bus creates; ignored when an
    /// external pool is supplied.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Dispatch through an existing pool. The bus will not shut it down.
    pub fn pool(mut self, pool: Arc<DispatchPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn delayed(mut self, config: DelayedConfig) -> Self {
        self.delayed = config;
        self
    }

    /// Use an existing delayed scheduler. The bus will not shut it down.
    pub fn scheduler(mut self, scheduler: Arc<DelayedScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> AsyncEventBus {
        let exception_handler = self
            .exception_handler
            .unwrap_or_else(|| Box::new(LoggingSubscriberExceptionHandler));
        let (pool, owns_pool) = match self.pool {
            Some(pool) => (pool, false),
            None => (
                Arc::new(DispatchPool::new(
                    format!("{}-dispatch-", self.identifier),
                    self.workers,
                )),
                true,
            ),
        };
        let scheduler = self.scheduler.map(|scheduler| SchedulerSlot {
            scheduler,
            owned: false,
        });
        AsyncEventBus {
            inner: Arc::new(AsyncInner {
                core: BusCore::new(
                    self.identifier,
                    self.max_subscribers_per_event,
                    InterceptorChain::new(self.interceptors),
                    exception_handler,
                ),
                pool,
                delayed: self.delayed,
                scheduler: Mutex::new(scheduler),
            }),
            owns_pool,
        }
    }
}
