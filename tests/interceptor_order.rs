use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use tribus::{
    EventBus, EventInterceptor, HandlerGroup, InterceptorContext, Listener,
    PerformanceMonitorInterceptor, PostedEvent,
};

#[derive(Debug)]
struct Ping;

#[derive(Debug)]
struct Broken;

struct Tagged {
    tag: i32,
    log: Arc<Mutex<Vec<String>>>,
}

impl EventInterceptor for Tagged {
    fn order(&self) -> i32 {
        self.tag
    }

    fn name(&self) -> &'static str {
        "tagged"
    }

    fn before_processing(&self, _event: &PostedEvent, _ctx: &InterceptorContext) {
        self.log.lock().unwrap().push(format!("before({})", self.tag));
    }

    fn after_processing_success(&self, _event: &PostedEvent, _ctx: &InterceptorContext) {
        self.log
            .lock()
            .unwrap()
            .push(format!("after_success({})", self.tag));
    }

    fn after_processing_failure(
        &self,
        _event: &PostedEvent,
        _cause: &anyhow::Error,
        _ctx: &InterceptorContext,
    ) {
        self.log
            .lock()
            .unwrap()
            .push(format!("after_failure({})", self.tag));
    }
}

fn logging_listener(log: Arc<Mutex<Vec<String>>>) -> Arc<Listener> {
    Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Ping>()
                    .primary(move |_ping: &Ping| {
                        log.lock().unwrap().push("primary".into());
                        Ok(())
                    })
                    .build(),
            )
            .build()
            .unwrap(),
    )
}

#[test]
fn before_hooks_ascend_and_after_hooks_descend() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    // Registered out of order on purpose; the chain sorts at construction.
    let bus = EventBus::builder("ordered")
        .interceptor(Arc::new(Tagged {
            tag: 2,
            log: log.clone(),
        }))
        .interceptor(Arc::new(Tagged {
            tag: 1,
            log: log.clone(),
        }))
        .build();
    bus.register(&logging_listener(log.clone())).unwrap();

    bus.post(Ping);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before(1)",
            "before(2)",
            "primary",
            "after_success(2)",
            "after_success(1)",
        ],
    );
}

#[test]
fn failure_hooks_also_run_in_reverse() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder("ordered")
        .interceptor(Arc::new(Tagged {
            tag: 1,
            log: log.clone(),
        }))
        .interceptor(Arc::new(Tagged {
            tag: 2,
            log: log.clone(),
        }))
        .build();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Broken>()
                    .primary(|_b: &Broken| Err(anyhow!("no")))
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    bus.post(Broken);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before(1)",
            "before(2)",
            "after_failure(2)",
            "after_failure(1)",
        ],
    );
}

struct Panicking;

impl EventInterceptor for Panicking {
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &'static str {
        "panicking"
    }

    fn before_processing(&self, _event: &PostedEvent, _ctx: &InterceptorContext) {
        panic!("interceptor bug");
    }
}

#[test]
fn interceptor_panic_affects_neither_siblings_nor_handler() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder("ordered")
        .interceptor(Arc::new(Panicking))
        .interceptor(Arc::new(Tagged {
            tag: 5,
            log: log.clone(),
        }))
        .build();
    bus.register(&logging_listener(log.clone())).unwrap();

    bus.post(Ping);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["before(5)", "primary", "after_success(5)"],
    );
}

struct AttributeWriter;

impl EventInterceptor for AttributeWriter {
    fn order(&self) -> i32 {
        1
    }

    fn before_processing(&self, _event: &PostedEvent, ctx: &InterceptorContext) {
        ctx.set_attribute("trace-id", 42u64);
    }
}

struct AttributeReader {
    seen: Arc<Mutex<Option<(u64, bool)>>>,
}

impl EventInterceptor for AttributeReader {
    fn order(&self) -> i32 {
        2
    }

    fn after_processing_success(&self, _event: &PostedEvent, ctx: &InterceptorContext) {
        let value = ctx.attribute_as::<u64>("trace-id").map(|v| *v);
        ctx.remove_attribute("trace-id");
        let gone = !ctx.has_attribute("trace-id");
        *self.seen.lock().unwrap() = value.map(|v| (v, gone));
    }
}

#[test]
fn attributes_flow_between_interceptors() {
    let seen = Arc::new(Mutex::new(None));
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder("ordered")
        .interceptor(Arc::new(AttributeWriter))
        .interceptor(Arc::new(AttributeReader { seen: seen.clone() }))
        .build();
    bus.register(&logging_listener(log)).unwrap();

    bus.post(Ping);

    assert_eq!(*seen.lock().unwrap(), Some((42, true)));
}

#[test]
fn monitor_interceptor_counts_outcomes_per_event_type() {
    let monitor = Arc::new(PerformanceMonitorInterceptor::new());
    let bus = EventBus::builder("monitored")
        .interceptor(monitor.clone())
        .build();

    let ok_listener = logging_listener(Arc::new(Mutex::new(Vec::new())));
    let failing = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Broken>()
                    .primary(|_b: &Broken| Err(anyhow!("still no")))
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&ok_listener).unwrap();
    bus.register(&failing).unwrap();

    bus.post(Ping);
    bus.post(Ping);
    bus.post(Broken);

    let ping_stats = monitor
        .stats_for(std::any::type_name::<Ping>())
        .expect("ping stats");
    assert_eq!(ping_stats.total(), 2);
    assert_eq!(ping_stats.success(), 2);
    assert_eq!(ping_stats.failure(), 0);
    assert!((ping_stats.success_rate() - 1.0).abs() < f64::EPSILON);

    let broken_stats = monitor
        .stats_for(std::any::type_name::<Broken>())
        .expect("broken stats");
    assert_eq!(broken_stats.total(), 1);
    assert_eq!(broken_stats.failure(), 1);
    assert_eq!(broken_stats.success(), 0);
    assert!(broken_stats.success_rate() < f64::EPSILON);

    assert_eq!(monitor.all_stats().len(), 2);
    monitor.clear();
    assert!(monitor.stats_for(std::any::type_name::<Ping>()).is_none());
}
