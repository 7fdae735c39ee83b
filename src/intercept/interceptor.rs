use crate::event::PostedEvent;
use crate::intercept::context::InterceptorContext;

/// Hook invoked around every primary-handler execution.
///
/// `before_processing` runs in ascending [`order`](Self::order) across the
/// chain; the two after-hooks run in descending order, finalizer-style.
/// Anything a hook raises (error or panic) is logged and swallowed: the
/// handler outcome and the remaining interceptors are never affected.
pub trait EventInterceptor: Send + Sync {
    /// Position in the chain; lower runs earlier in `before_processing`.
    fn order(&self) -> i32 {
        100
    }

    /// Short name used when a hook failure is logged.
    fn name(&self) -> &'static str {
        "interceptor"
    }

    fn before_processing(&self, _event: &PostedEvent, _ctx: &InterceptorContext) {}

    fn after_processing_success(&self, _event: &PostedEvent, _ctx: &InterceptorContext) {}

    fn after_processing_failure(
        &self,
        _event: &PostedEvent,
        _cause: &anyhow::Error,
        _ctx: &InterceptorContext,
    ) {
    }
}
