use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tribus::{
    AsyncEventBus, DispatchPool, FailureContext, FailureKind, HandlerGroup, Listener, RetryPolicy,
};

fn wait_for<F>(timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not met within {:?}", timeout);
}

#[derive(Debug)]
struct Seq(usize);

#[test]
fn each_subscriber_observes_post_order() {
    let bus = AsyncEventBus::builder("fifo").workers(4).build();
    let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let handler_seen = seen.clone();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Seq>()
                    .primary(move |event: &Seq| {
                        handler_seen.lock().unwrap().push(event.0);
                        Ok(())
                    })
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    const COUNT: usize = 200;
    for n in 0..COUNT {
        bus.post(Seq(n));
    }
    wait_for(Duration::from_secs(5), || seen.lock().unwrap().len() == COUNT);

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..COUNT).collect::<Vec<_>>());
}

#[test]
fn serialized_subscribers_never_run_concurrently() {
    let bus = AsyncEventBus::builder("serialized").workers(4).build();
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let handler_flight = in_flight.clone();
    let handler_overlaps = overlaps.clone();
    let handler_done = done.clone();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Seq>()
                    .primary(move |_event: &Seq| {
                        if handler_flight.swap(true, Ordering::SeqCst) {
                            handler_overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(2));
                        handler_flight.store(false, Ordering::SeqCst);
                        handler_done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    for n in 0..20 {
        bus.post(Seq(n));
    }
    wait_for(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 20);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_safe_subscribers_still_receive_everything() {
    let bus = AsyncEventBus::builder("concurrent").workers(4).build();
    let received = Arc::new(AtomicUsize::new(0));

    let handler_received = received.clone();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Seq>()
                    .primary(move |_event: &Seq| {
                        handler_received.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .allow_concurrent()
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    let bus = Arc::new(bus);
    let posters: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            thread::spawn(move || {
                for n in 0..25 {
                    bus.post(Seq(n));
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    wait_for(Duration::from_secs(5), || {
        received.load(Ordering::SeqCst) == 100
    });
}

/// With one pool worker the forwarded invocations run back-to-back, so
/// the lane's handoff order is directly observable: a concurrent-safe
/// subscriber must still see events in post order.
#[test]
fn concurrent_safe_subscribers_observe_post_order() {
    let bus = AsyncEventBus::builder("concurrent-fifo").workers(1).build();
    let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let handler_seen = seen.clone();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Seq>()
                    .primary(move |event: &Seq| {
                        handler_seen.lock().unwrap().push(event.0);
                        Ok(())
                    })
                    .allow_concurrent()
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    const COUNT: usize = 100;
    for n in 0..COUNT {
        bus.post(Seq(n));
    }
    wait_for(Duration::from_secs(5), || seen.lock().unwrap().len() == COUNT);

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..COUNT).collect::<Vec<_>>());
}

#[test]
fn fan_out_reaches_every_subscriber() {
    let bus = AsyncEventBus::builder("fanout").workers(4).build();
    let counters: Vec<Arc<AtomicUsize>> = (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let listeners: Vec<Arc<Listener>> = counters
        .iter()
        .map(|counter| {
            let counter = counter.clone();
            Arc::new(
                Listener::builder()
                    .group(
                        HandlerGroup::of::<Seq>()
                            .primary(move |_event: &Seq| {
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .build(),
                    )
                    .build()
                    .unwrap(),
            )
        })
        .collect();
    for listener in &listeners {
        bus.register(listener).unwrap();
    }

    for n in 0..10 {
        bus.post(Seq(n));
    }
    wait_for(Duration::from_secs(5), || {
        counters
            .iter()
            .all(|counter| counter.load(Ordering::SeqCst) == 10)
    });
}

#[test]
fn shutdown_interrupts_retry_backoff() {
    let bus = AsyncEventBus::builder("stopping").workers(2).build();
    let attempts = Arc::new(AtomicUsize::new(0));
    let capture: Arc<Mutex<Option<FailureContext>>> = Arc::new(Mutex::new(None));

    let handler_attempts = attempts.clone();
    let handler_capture = capture.clone();
    let listener = Arc::new(
        Listener::builder()
            .group(
                HandlerGroup::of::<Seq>()
                    .primary(move |_event: &Seq| {
                        handler_attempts.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow!("keeps failing"))
                    })
                    .retry(RetryPolicy::new(5, Duration::from_millis(200)))
                    .failure_with_context(move |_event: &Seq, ctx: &FailureContext| {
                        *handler_capture.lock().unwrap() = Some(ctx.clone());
                    })
                    .build(),
            )
            .build()
            .unwrap(),
    );
    bus.register(&listener).unwrap();

    bus.post(Seq(0));
    wait_for(Duration::from_secs(2), || {
        attempts.load(Ordering::SeqCst) >= 2
    });
    drop(bus);

    let captured = capture.lock().unwrap();
    let ctx = captured.as_ref().expect("failure branch ran");
    assert_eq!(ctx.kind(), FailureKind::ProcessingException);
    assert!(format!("{:#}", ctx.cause()).contains("interrupted"));
}

#[test]
fn external_pool_outlives_the_bus() {
    let pool = Arc::new(DispatchPool::new("shared-", 2));
    let received = Arc::new(AtomicUsize::new(0));

    {
        let bus = AsyncEventBus::builder("borrowed-pool")
            .pool(pool.clone())
            .build();
        let handler_received = received.clone();
        let listener = Arc::new(
            Listener::builder()
                .group(
                    HandlerGroup::of::<Seq>()
                        .primary(move |_event: &Seq| {
                            handler_received.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .build(),
                )
                .build()
                .unwrap(),
        );
        bus.register(&listener).unwrap();
        bus.post(Seq(1));
        wait_for(Duration::from_secs(2), || {
            received.load(Ordering::SeqCst) == 1
        });
    }

    // The bus is gone; the caller-owned pool still accepts work.
    assert!(!pool.is_shutdown());
    let ran = Arc::new(AtomicBool::new(false));
    let task_ran = ran.clone();
    assert!(pool.execute(move || task_ran.store(true, Ordering::SeqCst)));
    wait_for(Duration::from_secs(2), || ran.load(Ordering::SeqCst));
    pool.shutdown();
    assert!(pool.is_shutdown());
}
