use crate::event::PostedEvent;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Classification of a terminal dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The primary handler failed and no retries were configured, or the
    /// retry backoff was interrupted by cancellation.
    ProcessingException,
    /// Every configured attempt failed.
    RetryExhausted,
    /// The dispatch machinery itself misfired: the payload did not match
    /// the handler parameter type, or the idempotency predicate raised.
    SystemException,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ProcessingException => "PROCESSING_EXCEPTION",
            FailureKind::RetryExhausted => "RETRY_EXHAUSTED",
            FailureKind::SystemException => "SYSTEM_EXCEPTION",
        };
        f.write_str(label)
    }
}

/// Marker attached to causes that must classify as [`FailureKind::SystemException`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SystemFault {
    #[error("event payload does not downcast to the handler parameter type")]
    PayloadType,
    #[error("idempotency predicate raised instead of returning a verdict")]
    IdempotencyCheck,
}

impl FailureKind {
    pub(crate) fn classify(cause: &anyhow::Error, total_retries: u32, interrupted: bool) -> Self {
        if cause.downcast_ref::<SystemFault>().is_some() {
            FailureKind::SystemException
        } else if interrupted {
            FailureKind::ProcessingException
        } else if total_retries > 0 {
            FailureKind::RetryExhausted
        } else {
            FailureKind::ProcessingException
        }
    }
}

/// Immutable record of a terminal failure, handed to failure handlers.
#[derive(Clone)]
pub struct FailureContext {
    event: PostedEvent,
    cause: Arc<anyhow::Error>,
    total_retries: u32,
    first_attempt_at: SystemTime,
    last_attempt_at: SystemTime,
    elapsed: Duration,
    kind: FailureKind,
}

impl FailureContext {
    pub(crate) fn new(
        event: PostedEvent,
        cause: Arc<anyhow::Error>,
        total_retries: u32,
        first_attempt_at: SystemTime,
        last_attempt_at: SystemTime,
        elapsed: Duration,
        kind: FailureKind,
    ) -> Self {
        Self {
            event,
            cause,
            total_retries,
            first_attempt_at,
            last_attempt_at,
            elapsed,
            kind,
        }
    }

    /// The event whose dispatch failed.
    pub fn event(&self) -> &PostedEvent {
        &self.event
    }

    /// The last error observed before giving up.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn total_retries(&self) -> u32 {
        self.total_retries
    }

    pub fn has_retries(&self) -> bool {
        self.total_retries > 0
    }

    pub fn first_attempt_at(&self) -> SystemTime {
        self.first_attempt_at
    }

    pub fn last_attempt_at(&self) -> SystemTime {
        self.last_attempt_at
    }

    /// Wall time spent across every attempt, backoffs included.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Message of the root cause, for compact log lines.
    pub fn failure_message(&self) -> String {
        self.cause.root_cause().to_string()
    }
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FailureContext{{event={}, kind={}, retries={}, elapsed={}ms, cause={}}}",
            self.event.type_label(),
            self.kind,
            self.total_retries,
            self.elapsed.as_millis(),
            self.failure_message(),
        )
    }
}

impl fmt::Debug for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureContext")
            .field("event", &self.event.type_label())
            .field("kind", &self.kind)
            .field("total_retries", &self.total_retries)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}
