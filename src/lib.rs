//! tribus: an in-process event bus with a three-phase reliability model.
//!
//! Dispatch runs each `(subscriber, event)` pair through an idempotency
//! gate, a retrying primary handler and an optional terminal failure
//! handler, wrapped by an ordered interceptor chain. Two delivery models
//! are provided: [`EventBus`] drains reentrantly on the calling thread,
//! [`AsyncEventBus`] fans out over a worker pool and adds delayed
//! publication.

pub mod bus {
    pub mod async_event_bus;
    pub(crate) mod core;
    pub mod event_bus;
    pub mod exception;

    pub use async_event_bus::*;
    pub use event_bus::*;
    pub use exception::*;
}

pub mod intercept {
    pub mod chain;
    pub mod context;
    pub mod interceptor;
    pub mod logging;
    pub mod monitor;

    pub use chain::*;
    pub use context::*;
    pub use interceptor::*;
    pub use logging::*;
    pub use monitor::*;
}

pub mod process {
    pub mod failure;
    pub(crate) mod processor;
    pub mod retry;

    pub use failure::*;
    pub use retry::*;
}

pub mod registry {
    pub mod core;
    pub mod group;
    pub mod listener;
    pub mod subscriber;

    pub use self::core::*;
    pub use group::*;
    pub use listener::*;
    pub use subscriber::*;
}

pub mod runtime {
    pub mod pool;
    pub mod scheduler;

    pub use pool::*;
    pub use scheduler::*;
}

pub mod config;
pub mod event;

pub use bus::{
    AsyncEventBus, AsyncEventBusBuilder, EventBus, EventBusBuilder,
    LoggingSubscriberExceptionHandler, SubscriberExceptionContext, SubscriberExceptionHandler,
};
pub use config::{BusConfig, ConfigError, DelayedConfig};
pub use event::{AnyEvent, DeadEvent, PostedEvent};
pub use intercept::{
    AttributeValue, EventInterceptor, EventStats, InterceptorChain, InterceptorContext,
    LoggingEventInterceptor, PerformanceMonitorInterceptor,
};
pub use process::{CancelToken, FailureContext, FailureKind, RetryPolicy, SystemFault};
pub use registry::{
    DispatchKey, HandlerGroup, HandlerGroupBuilder, Listener, ListenerBuilder, RegistryError,
    Subscriber, SubscriberRegistry, WildcardGroupBuilder,
};
pub use runtime::{DelayedHandle, DelayedScheduler, DispatchPool};
