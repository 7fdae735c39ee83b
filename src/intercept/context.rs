use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Value stored in the interceptor attribute map.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

const END_UNSET: u64 = u64::MAX;

/// Mutable per-dispatch scratchpad shared with every interceptor.
///
/// Interceptors may run on a different thread than the handler on the
/// pooled bus, so every field is independently thread-safe.
pub struct InterceptorContext {
    started_at: SystemTime,
    started: Instant,
    end_offset_ns: AtomicU64,
    retry_count: AtomicU32,
    skipped: AtomicBool,
    attributes: Mutex<HashMap<String, AttributeValue>>,
}

impl InterceptorContext {
    pub(crate) fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
            started: Instant::now(),
            end_offset_ns: AtomicU64::new(END_UNSET),
            retry_count: AtomicU32::new(0),
            skipped: AtomicBool::new(false),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Wall-clock instant at which the dispatch began.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Time spent so far, or the final duration once the dispatch ended.
    pub fn duration(&self) -> Duration {
        match self.end_offset_ns.load(Ordering::Acquire) {
            END_UNSET => self.started.elapsed(),
            nanos => Duration::from_nanos(nanos),
        }
    }

    /// Whether the primary phase has finished (either way).
    pub fn ended(&self) -> bool {
        self.end_offset_ns.load(Ordering::Acquire) != END_UNSET
    }

    /// Retries consumed so far by the primary phase.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    /// True when the idempotency gate short-circuited the dispatch.
    pub fn skipped(&self) -> bool {
        self.skipped.load(Ordering::Acquire)
    }

    pub fn set_attribute<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.attributes
            .lock()
            .unwrap()
            .insert(key.into(), Arc::new(value));
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.lock().unwrap().get(key).cloned()
    }

    /// Typed read of an attribute; `None` when absent or of another type.
    pub fn attribute_as<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.attribute(key).and_then(|v| v.downcast::<V>().ok())
    }

    pub fn remove_attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.lock().unwrap().remove(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.lock().unwrap().contains_key(key)
    }

    pub(crate) fn set_retry_count(&self, count: u32) {
        self.retry_count.store(count, Ordering::Release);
    }

    pub(crate) fn set_skipped(&self) {
        self.skipped.store(true, Ordering::Release);
    }

    pub(crate) fn finish(&self) {
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(END_UNSET - 1);
        self.end_offset_ns.store(nanos, Ordering::Release);
    }
}

impl fmt::Display for InterceptorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .attributes
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        write!(
            f,
            "InterceptorContext{{duration={}ms, retries={}, skipped={}, attributes={:?}}}",
            self.duration().as_millis(),
            self.retry_count(),
            self.skipped(),
            keys,
        )
    }
}

impl fmt::Debug for InterceptorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorContext")
            .field("duration", &self.duration())
            .field("retry_count", &self.retry_count())
            .field("skipped", &self.skipped())
            .finish()
    }
}
