use crate::event::PostedEvent;
use tracing::warn;

/// Where a primary-handler failure came from, for the exception hook.
pub struct SubscriberExceptionContext<'a> {
    bus_identifier: &'a str,
    event: &'a PostedEvent,
    listener: &'a str,
    handler: &'a str,
}

impl<'a> SubscriberExceptionContext<'a> {
    pub(crate) fn new(
        bus_identifier: &'a str,
        event: &'a PostedEvent,
        listener: &'a str,
        handler: &'a str,
    ) -> Self {
        Self {
            bus_identifier,
            event,
            listener,
            handler,
        }
    }

    pub fn bus_identifier(&self) -> &str {
        self.bus_identifier
    }

    pub fn event(&self) -> &PostedEvent {
        self.event
    }

    /// Label of the owning listener.
    pub fn listener(&self) -> &str {
        self.listener
    }

    /// Event-type label of the primary handler that failed.
    pub fn handler(&self) -> &str {
        self.handler
    }
}

/// Hook receiving every terminal primary-handler failure after the
/// failure branch ran. Implementations must not raise; panics are caught
/// and logged by the processor.
pub trait SubscriberExceptionHandler: Send + Sync {
    fn handle(&self, cause: &anyhow::Error, context: &SubscriberExceptionContext<'_>);
}

/// Default hook: one warn line per terminal failure.
#[derive(Debug, Default)]
pub struct LoggingSubscriberExceptionHandler;

impl SubscriberExceptionHandler for LoggingSubscriberExceptionHandler {
    fn handle(&self, cause: &anyhow::Error, context: &SubscriberExceptionContext<'_>) {
        warn!(
            bus = context.bus_identifier(),
            event = context.event().type_label(),
            listener = context.listener(),
            handler = context.handler(),
            "subscriber raised: {cause:#}",
        );
    }
}
