use crate::event::PostedEvent;
use crate::intercept::context::InterceptorContext;
use crate::intercept::interceptor::EventInterceptor;
use tracing::{debug, warn};

/// Interceptor that traces the begin/success/failure of every dispatch.
///
/// Runs early in the chain (order 10) so its begin line precedes every
/// other interceptor and its after-hooks fire last, once the rest of the
/// chain has finished with the dispatch.
#[derive(Debug, Default)]
pub struct LoggingEventInterceptor;

impl LoggingEventInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl EventInterceptor for LoggingEventInterceptor {
    fn order(&self) -> i32 {
        10
    }

    fn name(&self) -> &'static str {
        "logging"
    }

    fn before_processing(&self, event: &PostedEvent, _ctx: &InterceptorContext) {
        debug!(event = event.type_label(), "dispatch started");
    }

    fn after_processing_success(&self, event: &PostedEvent, ctx: &InterceptorContext) {
        debug!(
            event = event.type_label(),
            duration_ms = ctx.duration().as_millis() as u64,
            retries = ctx.retry_count(),
            skipped = ctx.skipped(),
            "dispatch succeeded",
        );
    }

    fn after_processing_failure(
        &self,
        event: &PostedEvent,
        cause: &anyhow::Error,
        ctx: &InterceptorContext,
    ) {
        warn!(
            event = event.type_label(),
            duration_ms = ctx.duration().as_millis() as u64,
            retries = ctx.retry_count(),
            "dispatch failed: {cause:#}",
        );
    }
}
