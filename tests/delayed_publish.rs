use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tribus::{AsyncEventBus, DelayedConfig, DelayedScheduler, HandlerGroup, Listener};

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
struct Tick;

struct CountingListener {
    received: Arc<AtomicUsize>,
    fired_at: Arc<Mutex<Option<Instant>>>,
}

impl CountingListener {
    fn new() -> Self {
        Self {
            received: Arc::new(AtomicUsize::new(0)),
            fired_at: Arc::new(Mutex::new(None)),
        }
    }

    fn listener(&self) -> Arc<Listener> {
        let received = self.received.clone();
        let fired_at = self.fired_at.clone();
        Arc::new(
            Listener::builder()
                .group(
                    HandlerGroup::of::<Tick>()
                        .primary(move |_tick: &Tick| {
                            received.fetch_add(1, Ordering::SeqCst);
                            *fired_at.lock().unwrap() = Some(Instant::now());
                            Ok(())
                        })
                        .build(),
                )
                .build()
                .unwrap(),
        )
    }
}

#[test]
fn delayed_event_fires_after_its_deadline() {
    let bus = AsyncEventBus::builder("delayed").workers(2).build();
    let spy = CountingListener::new();
    bus.register(&spy.listener()).unwrap();

    let scheduled_at = Instant::now();
    let handle = bus.post_delayed(Tick, Duration::from_millis(200));
    assert!(handle.is_some());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(spy.received.load(Ordering::SeqCst), 0);

    wait_for(Duration::from_secs(2), || {
        spy.received.load(Ordering::SeqCst) == 1
    });
    let fired_at = spy.fired_at.lock().unwrap().unwrap();
    assert!(fired_at.duration_since(scheduled_at) >= Duration::from_millis(200));
}

#[test]
fn zero_delay_posts_immediately() {
    let bus = AsyncEventBus::builder("delayed").workers(2).build();
    let spy = CountingListener::new();
    bus.register(&spy.listener()).unwrap();

    let handle = bus.post_delayed(Tick, Duration::ZERO);
    assert!(handle.is_none());
    wait_for(Duration::from_secs(2), || {
        spy.received.load(Ordering::SeqCst) == 1
    });
}

#[test]
fn disabled_delayed_dispatch_falls_back_to_immediate_post() {
    let bus = AsyncEventBus::builder("delayed")
        .workers(2)
        .delayed(DelayedConfig {
            enabled: false,
            ..DelayedConfig::default()
        })
        .build();
    let spy = CountingListener::new();
    bus.register(&spy.listener()).unwrap();

    let handle = bus.post_delayed(Tick, Duration::from_millis(500));
    assert!(handle.is_none());
    wait_for(Duration::from_secs(2), || {
        spy.received.load(Ordering::SeqCst) == 1
    });
}

#[test]
fn cancelling_a_pending_task_removes_it_eagerly() {
    let scheduler = Arc::new(DelayedScheduler::start(&DelayedConfig::default()));
    let bus = AsyncEventBus::builder("delayed")
        .workers(2)
        .scheduler(scheduler.clone())
        .build();
    let spy = CountingListener::new();
    bus.register(&spy.listener()).unwrap();

    let handle = bus
        .post_delayed(Tick, Duration::from_millis(300))
        .expect("scheduled");
    assert_eq!(scheduler.pending(), 1);

    assert!(handle.cancel());
    assert!(handle.is_cancelled());
    assert_eq!(scheduler.pending(), 0);
    assert!(!handle.cancel());

    thread::sleep(Duration::from_millis(400));
    assert_eq!(spy.received.load(Ordering::SeqCst), 0);
    scheduler.shutdown();
}

#[test]
fn external_scheduler_is_not_shut_down_with_the_bus() {
    let scheduler = Arc::new(DelayedScheduler::start(&DelayedConfig::default()));
    {
        let bus = AsyncEventBus::builder("delayed")
            .workers(2)
            .scheduler(scheduler.clone())
            .build();
        let spy = CountingListener::new();
        bus.register(&spy.listener()).unwrap();
        bus.post_delayed(Tick, Duration::from_millis(10));
        wait_for(Duration::from_secs(2), || {
            spy.received.load(Ordering::SeqCst) == 1
        });
    }

    assert!(!scheduler.is_shutdown());
    let fired = Arc::new(AtomicUsize::new(0));
    let task_fired = fired.clone();
    scheduler
        .schedule(Duration::from_millis(10), move || {
            task_fired.fetch_add(1, Ordering::SeqCst);
        })
        .expect("still schedulable");
    wait_for(Duration::from_secs(2), || fired.load(Ordering::SeqCst) == 1);
    scheduler.shutdown();
}

#[test]
fn shutdown_refuses_tasks_whose_deadline_has_not_elapsed() {
    let scheduler = DelayedScheduler::start(&DelayedConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));

    let task_fired = fired.clone();
    scheduler
        .schedule(Duration::from_millis(300), move || {
            task_fired.fetch_add(1, Ordering::SeqCst);
        })
        .expect("scheduled");
    scheduler.shutdown();

    assert!(scheduler.is_shutdown());
    thread::sleep(Duration::from_millis(400));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // New work is refused once shut down.
    assert!(scheduler
        .schedule(Duration::from_millis(1), || {})
        .is_none());
}

#[test]
fn a_panicking_task_does_not_kill_the_timer_worker() {
    let scheduler = DelayedScheduler::start(&DelayedConfig {
        enabled: true,
        core_workers: 1,
        thread_name_prefix: "lone-timer-".into(),
    });
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule(Duration::from_millis(10), || panic!("bad task"))
        .expect("scheduled");
    let task_fired = fired.clone();
    scheduler
        .schedule(Duration::from_millis(20), move || {
            task_fired.fetch_add(1, Ordering::SeqCst);
        })
        .expect("scheduled");

    wait_for(Duration::from_secs(2), || fired.load(Ordering::SeqCst) == 1);
    scheduler.shutdown();
}

#[test]
fn timer_threads_carry_the_configured_name_prefix() {
    let scheduler = DelayedScheduler::start(&DelayedConfig {
        enabled: true,
        core_workers: 2,
        thread_name_prefix: "my-timer-".into(),
    });
    let name: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let task_name = name.clone();
    scheduler
        .schedule(Duration::from_millis(5), move || {
            *task_name.lock().unwrap() =
                thread::current().name().map(|n| n.to_string());
        })
        .expect("scheduled");

    wait_for(Duration::from_secs(2), || name.lock().unwrap().is_some());
    let name = name.lock().unwrap().clone().unwrap();
    assert!(name.starts_with("my-timer-"), "unexpected name {name}");
    scheduler.shutdown();
}
