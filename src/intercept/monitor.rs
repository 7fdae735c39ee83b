use crate::event::PostedEvent;
use crate::intercept::context::InterceptorContext;
use crate::intercept::interceptor::EventInterceptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// Per-event-type dispatch counters collected by [`PerformanceMonitorInterceptor`].
#[derive(Debug, Default)]
pub struct EventStats {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    total_duration_ns: AtomicU64,
}

impl EventStats {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.total_duration_ns.load(Ordering::Relaxed))
    }

    pub fn average_duration(&self) -> Duration {
        let total = self.total();
        if total == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_duration_ns.load(Ordering::Relaxed) / total)
    }

    /// Fraction of dispatches that succeeded, in `[0.0, 1.0]`.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.success() as f64 / total as f64
    }

    fn record(&self, duration: Duration, succeeded: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_ns.fetch_add(nanos, Ordering::Relaxed);
    }
}

/// Interceptor accumulating dispatch statistics per event type.
///
/// Sits mid-chain (order 50). Dispatches slower than the configured
/// threshold are logged at warn level.
pub struct PerformanceMonitorInterceptor {
    stats: RwLock<HashMap<&'static str, Arc<EventStats>>>,
    slow_threshold: Duration,
}

impl PerformanceMonitorInterceptor {
    pub fn new() -> Self {
        Self::with_slow_threshold(Duration::from_secs(1))
    }

    pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            slow_threshold,
        }
    }

    /// Counters for one event type, if it was ever dispatched.
    pub fn stats_for(&self, type_label: &str) -> Option<Arc<EventStats>> {
        self.stats.read().unwrap().get(type_label).cloned()
    }

    /// Snapshot of every tracked event type.
    pub fn all_stats(&self) -> Vec<(&'static str, Arc<EventStats>)> {
        self.stats
            .read()
            .unwrap()
            .iter()
            .map(|(label, stats)| (*label, stats.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.stats.write().unwrap().clear();
    }

    fn stats_entry(&self, type_label: &'static str) -> Arc<EventStats> {
        if let Some(stats) = self.stats.read().unwrap().get(type_label) {
            return stats.clone();
        }
        self.stats
            .write()
            .unwrap()
            .entry(type_label)
            .or_default()
            .clone()
    }

    fn record(&self, event: &PostedEvent, ctx: &InterceptorContext, succeeded: bool) {
        let duration = ctx.duration();
        self.stats_entry(event.type_label())
            .record(duration, succeeded);
        if duration > self.slow_threshold {
            warn!(
                event = event.type_label(),
                duration_ms = duration.as_millis() as u64,
                "slow event dispatch",
            );
        }
    }
}

impl Default for PerformanceMonitorInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventInterceptor for PerformanceMonitorInterceptor {
    fn order(&self) -> i32 {
        50
    }

    fn name(&self) -> &'static str {
        "performance-monitor"
    }

    fn after_processing_success(&self, event: &PostedEvent, ctx: &InterceptorContext) {
        self.record(event, ctx, true);
    }

    fn after_processing_failure(
        &self,
        event: &PostedEvent,
        _cause: &anyhow::Error,
        ctx: &InterceptorContext,
    ) {
        self.record(event, ctx, false);
    }
}
