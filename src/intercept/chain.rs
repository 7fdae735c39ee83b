use crate::event::PostedEvent;
use crate::intercept::context::InterceptorContext;
use crate::intercept::interceptor::EventInterceptor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Immutable, order-sorted collection of interceptors.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn EventInterceptor>>,
}

impl InterceptorChain {
    pub fn new(mut interceptors: Vec<Arc<dyn EventInterceptor>>) -> Self {
        interceptors.sort_by_key(|i| i.order());
        Self { interceptors }
    }

    pub fn empty() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub(crate) fn before_processing(&self, event: &PostedEvent, ctx: &InterceptorContext) {
        for interceptor in &self.interceptors {
            Self::guarded(interceptor, "before_processing", event, || {
                interceptor.before_processing(event, ctx)
            });
        }
    }

    pub(crate) fn after_processing_success(&self, event: &PostedEvent, ctx: &InterceptorContext) {
        for interceptor in self.interceptors.iter().rev() {
            Self::guarded(interceptor, "after_processing_success", event, || {
                interceptor.after_processing_success(event, ctx)
            });
        }
    }

    pub(crate) fn after_processing_failure(
        &self,
        event: &PostedEvent,
        cause: &anyhow::Error,
        ctx: &InterceptorContext,
    ) {
        for interceptor in self.interceptors.iter().rev() {
            Self::guarded(interceptor, "after_processing_failure", event, || {
                interceptor.after_processing_failure(event, cause, ctx)
            });
        }
    }

    fn guarded(
        interceptor: &Arc<dyn EventInterceptor>,
        hook: &'static str,
        event: &PostedEvent,
        call: impl FnOnce(),
    ) {
        if panic::catch_unwind(AssertUnwindSafe(call)).is_err() {
            warn!(
                interceptor = interceptor.name(),
                order = interceptor.order(),
                event = event.type_label(),
                "interceptor {hook} panicked; continuing with the rest of the chain",
            );
        }
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::empty()
    }
}
