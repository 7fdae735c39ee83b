use crate::bus::exception::{SubscriberExceptionContext, SubscriberExceptionHandler};
use crate::event::PostedEvent;
use crate::intercept::chain::InterceptorChain;
use crate::intercept::context::InterceptorContext;
use crate::process::failure::{FailureContext, FailureKind, SystemFault};
use crate::process::retry::CancelToken;
use crate::registry::group::{PredicateFn, PrimaryFn};
use crate::registry::subscriber::Subscriber;
use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, error, warn};

/// Everything a dispatch needs besides the subscriber and the event.
pub(crate) struct DispatchEnv<'a> {
    pub(crate) bus_identifier: &'a str,
    pub(crate) interceptors: &'a InterceptorChain,
    pub(crate) exception_handler: &'a dyn SubscriberExceptionHandler,
    pub(crate) cancel: &'a CancelToken,
}

/// Runs the three-phase protocol for one `(subscriber, event)` pair:
/// interceptor begin, idempotency gate, retrying primary, failure branch,
/// interceptor end. Never raises; every outcome ends in exactly one
/// after-hook pass.
pub(crate) fn process_event(subscriber: &Subscriber, event: &PostedEvent, env: &DispatchEnv<'_>) {
    let group = subscriber.group();
    let ctx = InterceptorContext::new();
    let first_attempt_at = SystemTime::now();
    let started = Instant::now();

    env.interceptors.before_processing(event, &ctx);

    let _serialized = subscriber.serialize().map(|m| m.lock().unwrap());

    if let Some(predicate) = group.idempotent.as_deref() {
        match run_predicate(predicate, event) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    event = event.type_label(),
                    listener = subscriber.listener().label(),
                    "idempotency gate declined the event; skipping",
                );
                ctx.set_skipped();
                ctx.finish();
                env.interceptors.after_processing_success(event, &ctx);
                return;
            }
            Err(cause) => {
                let cause = cause.context(SystemFault::IdempotencyCheck);
                fail(subscriber, event, env, &ctx, cause, started, first_attempt_at, false);
                return;
            }
        }
    }

    let policy = group.retry();
    let max_attempts = policy.map(|p| p.max_attempts()).unwrap_or(1);
    let mut last_error = None;
    let mut interrupted = false;

    for attempt in 1..=max_attempts {
        match run_primary(group.primary.as_ref(), event) {
            Ok(()) => {
                if attempt > 1 {
                    debug!(
                        event = event.type_label(),
                        attempt,
                        "primary handler succeeded after retrying",
                    );
                }
                ctx.finish();
                env.interceptors.after_processing_success(event, &ctx);
                return;
            }
            Err(cause) => {
                ctx.set_retry_count(attempt - 1);
                last_error = Some(cause);
                if attempt == max_attempts {
                    break;
                }
                let policy = match policy {
                    Some(policy) => policy,
                    None => break,
                };
                warn!(
                    event = event.type_label(),
                    listener = subscriber.listener().label(),
                    attempt,
                    backoff_ms = policy.interval().as_millis() as u64,
                    "primary handler failed; retrying after backoff",
                );
                if !env.cancel.wait(policy.interval()) {
                    last_error =
                        last_error.map(|e| e.context("retry backoff interrupted by cancellation"));
                    interrupted = true;
                    break;
                }
            }
        }
    }

    let cause = last_error.unwrap_or_else(|| anyhow!("primary handler failed"));
    fail(subscriber, event, env, &ctx, cause, started, first_attempt_at, interrupted);
}

#[allow(clippy::too_many_arguments)]
fn fail(
    subscriber: &Subscriber,
    event: &PostedEvent,
    env: &DispatchEnv<'_>,
    ctx: &InterceptorContext,
    cause: anyhow::Error,
    started: Instant,
    first_attempt_at: SystemTime,
    interrupted: bool,
) {
    let group = subscriber.group();
    let total_retries = ctx.retry_count();
    let kind = FailureKind::classify(&cause, total_retries, interrupted);
    let cause = Arc::new(cause);
    error!(
        event = event.type_label(),
        listener = subscriber.listener().label(),
        kind = %kind,
        retries = total_retries,
        "event dispatch failed terminally: {:#}",
        cause.as_ref(),
    );

    let failure_ctx = FailureContext::new(
        event.clone(),
        cause.clone(),
        total_retries,
        first_attempt_at,
        SystemTime::now(),
        started.elapsed(),
        kind,
    );
    if let Some(handler) = group.failure.as_ref() {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(event, &failure_ctx)));
        if outcome.is_err() {
            warn!(
                event = event.type_label(),
                listener = subscriber.listener().label(),
                "failure handler panicked; ignoring",
            );
        }
    }

    ctx.finish();
    env.interceptors.after_processing_failure(event, &cause, ctx);

    let hook_ctx = SubscriberExceptionContext::new(
        env.bus_identifier,
        event,
        subscriber.listener().label(),
        group.event_label(),
    );
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        env.exception_handler.handle(&cause, &hook_ctx)
    }));
    if outcome.is_err() {
        warn!(
            event = event.type_label(),
            "subscriber exception handler panicked; ignoring",
        );
    }
}

fn run_primary(primary: &PrimaryFn, event: &PostedEvent) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| primary(event))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "primary handler panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn run_predicate(predicate: &PredicateFn, event: &PostedEvent) -> anyhow::Result<bool> {
    match panic::catch_unwind(AssertUnwindSafe(|| predicate(event))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "idempotency predicate panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
